//! Basic usage scenarios against a running Brackit server.
//!
//! ```text
//! cargo run --example simple -- [host] [port]
//! ```
use brackit::{ClientError, Connection, ConnectionConfig, DEFAULT_PORT};
use rand::Rng;
use std::error::Error;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

const SEVERITIES: [&str; 3] = ["low", "high", "critical"];

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_owned());
    let port = args.next().and_then(|port| port.parse().ok()).unwrap_or(DEFAULT_PORT);
    let config = ConnectionConfig::builder(host, port)
        .connect_timeout(Duration::from_secs(5))
        .build();

    if let Err(error) = run(&config) {
        eprintln!("error: {}", error);
        std::process::exit(1);
    }
}

fn run(config: &ConnectionConfig) -> Result<(), Box<dyn Error>> {
    single_query(config)?;
    catalog(config)?;
    document_handling(config)?;
    transaction_management(config)?;
    Ok(())
}

fn single_query(config: &ConnectionConfig) -> Result<(), ClientError> {
    let mut connection = Connection::open_with(config)?;
    let mut out = io::stdout();

    connection.query("1+1", &mut out)?;
    println!();

    connection.close()
}

fn catalog(config: &ConnectionConfig) -> Result<(), ClientError> {
    let mut connection = Connection::open_with(config)?;
    let mut out = io::stdout();

    // whole catalog
    connection.query("doc('_master.xml')", &mut out)?;
    println!();

    // names of all collections
    connection.query("doc('_master.xml')//collection/@name/string()", &mut out)?;
    println!();

    connection.close()
}

fn document_handling(config: &ConnectionConfig) -> Result<(), Box<dyn Error>> {
    let dir = tempfile::Builder::new().prefix("docs").tempdir()?;
    for _ in 0..10 {
        generate_sample_doc(dir.path())?;
    }

    let mut connection = Connection::open_with(config)?;
    let mut out = io::stdout();

    let load = format!("bit:load('mydocs.col', io:ls('{}', '\\.xml$'))", dir.path().display());
    connection.query(load.as_str(), &mut out)?;
    println!();

    connection.query("doc('_master.xml')//collection[@name = '/mydocs.col']", &mut out)?;
    println!();

    connection.query("fn:collection('/mydocs.col')[1]", &mut out)?;
    println!();

    // typed index on the source addresses
    connection.query("bdb:create-cas-index('/mydocs.col', 'xs:string', '//src')", &mut out)?;
    println!();

    connection.query("doc('_master.xml')//collection[@name = '/mydocs.col']", &mut out)?;
    println!();

    // assumes the index created above got the ID 8
    connection.query(
        "bdb:scan-cas-index('/mydocs.col', 8, '192.168.0.0', '192.168.128.128', xs:boolean(1), xs:boolean(1), ())",
        &mut out,
    )?;
    println!();

    connection.close()?;
    Ok(())
}

fn transaction_management(config: &ConnectionConfig) -> Result<(), ClientError> {
    let mut connection = Connection::open_with(config)?;
    let mut out = io::stdout();

    connection.begin()?;
    connection.query("bit:store('sample.xml', <foo><bar/></foo>)", &mut out)?;
    connection.commit()?;

    connection.begin()?;
    connection.query("doc('/sample.xml')", &mut out)?;
    println!();
    connection.query("insert node <test/> into doc('/sample.xml')/foo/bar", &mut out)?;
    connection.query("doc('/sample.xml')", &mut out)?;
    connection.rollback()?;

    // the inserted node is gone again
    println!();
    connection.query("doc('/sample.xml')", &mut out)?;
    println!();

    connection.close()
}

/// A point in time within the week before `now`, in milliseconds since the epoch.
fn log_timestamp(now: Duration, rng: &mut impl Rng) -> u128 {
    now.as_millis().saturating_sub(rng.gen_range(0..6000 * 60 * 24 * 7) as u128)
}

fn generate_sample_doc(dir: &Path) -> io::Result<()> {
    let mut rng = rand::thread_rng();
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let tstamp = log_timestamp(now, &mut rng);
    let severity = SEVERITIES[rng.gen_range(0..SEVERITIES.len())];
    let src = format!("192.168.{}.{}", rng.gen_range(1..255), rng.gen_range(1..255));

    let length = rng.gen_range(10..80);
    let mut msg = String::with_capacity(length);
    while msg.len() < length {
        let word = rng.gen_range(1..=8).min(length - msg.len());
        msg.extend((0..word).map(|_| rng.gen_range(b'a'..=b'z') as char));
        if msg.len() < length - 1 {
            msg.push(' ');
        }
    }

    let file = tempfile::Builder::new()
        .prefix("sample")
        .suffix(".xml")
        .tempfile_in(dir)?;
    let (mut file, path): (File, _) = file.keep().map_err(|e| e.error)?;
    write!(
        file,
        "<?xml version='1.0'?><log tstamp='{}' severity='{}'><src>{}</src><msg>{}</msg></log>",
        tstamp, severity, src, msg
    )?;
    tracing::debug!(path = %path.display(), "sample document written");
    Ok(())
}
