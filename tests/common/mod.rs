#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

type Store = Arc<Mutex<HashMap<String, String>>>;

/// In-process server speaking the wire protocol over TCP, backed by an in-memory key/value store.
///
/// Statements it understands:
/// * `1+1` evaluates to `2`
/// * `store <key> <value>` and `mutate <key> <value>` write a document
/// * `read <key>` returns a document
/// * `echo <bytes>` returns the bytes after `echo ` unmodified
/// * `repeat <count>` returns `count` times the byte `x`
///
/// Anything else fails with a syntax error.
pub struct FakeServer {
    port: u16,
}

impl FakeServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake server");
        let port = listener.local_addr().expect("local address").port();
        let store = Store::default();

        thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => break,
                };
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let _ = Session::new(stream, store).and_then(|session| session.run());
                });
            }
        });

        Self { port }
    }

    pub fn host(&self) -> &'static str {
        "127.0.0.1"
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

struct Session {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    store: Store,
    pending: Option<HashMap<String, String>>,
}

impl Session {
    fn new(stream: TcpStream, store: Store) -> io::Result<Self> {
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
            store,
            pending: None,
        })
    }

    fn run(mut self) -> io::Result<()> {
        loop {
            let mut opcode = [0u8];
            match self.reader.read_exact(&mut opcode) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            }

            match opcode[0] {
                0x00 => {
                    let statement = self.read_arg()?;
                    let outcome = self.evaluate(&statement);
                    self.answer_query(outcome)?;
                }
                0x10 => {
                    let outcome = match self.pending {
                        Some(_) => Err("transaction already active".to_owned()),
                        None => {
                            self.pending = Some(HashMap::new());
                            Ok(())
                        }
                    };
                    self.answer(outcome)?;
                }
                0x11 => {
                    let outcome = match self.pending.take() {
                        Some(writes) => {
                            self.store.lock().unwrap().extend(writes);
                            Ok(())
                        }
                        None => Err("no active transaction".to_owned()),
                    };
                    self.answer(outcome)?;
                }
                0x12 => {
                    let outcome = match self.pending.take() {
                        Some(_) => Ok(()),
                        None => Err("no active transaction".to_owned()),
                    };
                    self.answer(outcome)?;
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_arg(&mut self) -> io::Result<Vec<u8>> {
        let mut argument = vec![];
        let mut escaped = false;

        loop {
            let mut byte = [0u8];
            self.reader.read_exact(&mut byte)?;
            match (escaped, byte[0]) {
                (false, 0xFF) => escaped = true,
                (false, 0x00) => return Ok(argument),
                (_, byte) => {
                    escaped = false;
                    argument.push(byte);
                }
            }
        }
    }

    fn evaluate(&mut self, statement: &[u8]) -> Result<Vec<u8>, String> {
        if let Some(bytes) = statement.strip_prefix(b"echo ") {
            return Ok(bytes.to_vec());
        }

        let statement = String::from_utf8_lossy(statement).into_owned();
        let mut words = statement.splitn(3, ' ');

        match (words.next(), words.next(), words.next()) {
            (Some("1+1"), None, None) => Ok(b"2".to_vec()),
            (Some("store"), Some(key), Some(value)) | (Some("mutate"), Some(key), Some(value)) => {
                match self.pending.as_mut() {
                    Some(writes) => {
                        writes.insert(key.to_owned(), value.to_owned());
                    }
                    None => {
                        self.store.lock().unwrap().insert(key.to_owned(), value.to_owned());
                    }
                }
                Ok(vec![])
            }
            (Some("read"), Some(key), None) => {
                let pending = self.pending.as_ref().and_then(|writes| writes.get(key).cloned());
                pending
                    .or_else(|| self.store.lock().unwrap().get(key).cloned())
                    .map(String::into_bytes)
                    .ok_or_else(|| format!("[err:FODC0002] Document '{}' not found.", key))
            }
            (Some("repeat"), Some(count), None) => count
                .parse::<usize>()
                .map(|count| vec![b'x'; count])
                .map_err(|_| "[err:FORG0001] Invalid count.".to_owned()),
            _ => Err("[err:XPST0003] Syntax error.".to_owned()),
        }
    }

    fn answer_query(&mut self, outcome: Result<Vec<u8>, String>) -> io::Result<()> {
        let (result, info, status) = match outcome {
            Ok(result) => (result, "Query executed.".to_owned(), 0u8),
            Err(diagnostic) => (vec![], diagnostic, 1u8),
        };

        let mut frame = Vec::with_capacity(result.len() + info.len() + 3);
        for byte in result {
            if byte == 0x00 || byte == 0xFF {
                frame.push(0xFF);
            }
            frame.push(byte);
        }
        frame.push(0);
        frame.extend_from_slice(info.as_bytes());
        frame.push(0);
        frame.push(status);

        self.writer.write_all(&frame)?;
        self.writer.flush()
    }

    fn answer(&mut self, outcome: Result<(), String>) -> io::Result<()> {
        let (info, status) = match outcome {
            Ok(()) => (String::new(), 0u8),
            Err(diagnostic) => (diagnostic, 1u8),
        };

        let mut frame = info.into_bytes();
        frame.push(0);
        frame.push(status);

        self.writer.write_all(&frame)?;
        self.writer.flush()
    }
}
