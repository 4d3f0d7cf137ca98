//! In-process scripted memcached (ASCII) for integration tests.
//!
//! Speaks enough of the protocol to exercise the client end to end:
//! storage commands with data blocks, multi-key get/gets with CAS
//! tokens, arithmetic, delete, flush_all, version and stats. State is
//! shared across connections so reconnects observe earlier writes.
//! Storing under a key beginning with `__error__` yields a
//! `SERVER_ERROR` so error plumbing can be tested.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Clone)]
struct Entry {
    flags: u32,
    data: Vec<u8>,
    cas: u64,
}

type Store = Arc<Mutex<HashMap<Vec<u8>, Entry>>>;

pub struct MockServer {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    store: Store,
}

impl MockServer {
    pub fn start() -> Self {
        Self::bind("127.0.0.1:0".parse().unwrap()).expect("bind mock server")
    }

    /// Bind a specific address (to bring a "crashed" node back up on the
    /// port a client is already retrying).
    pub fn start_on(addr: SocketAddr) -> std::io::Result<Self> {
        Self::bind(addr)
    }

    fn bind(bind_addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr)?;
        let addr = listener.local_addr().unwrap();
        listener.set_nonblocking(true).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let store: Store = Arc::default();
        let cas_counter = Arc::new(AtomicU64::new(1));

        {
            let stop = Arc::clone(&stop);
            let store = Arc::clone(&store);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            let store = Arc::clone(&store);
                            let stop = Arc::clone(&stop);
                            let cas_counter = Arc::clone(&cas_counter);
                            thread::spawn(move || serve(stream, store, cas_counter, stop));
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(5));
                        }
                        Err(_) => break,
                    }
                }
            });
        }

        Ok(Self { addr, stop, store })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of keys currently stored.
    pub fn item_count(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    /// An address nothing is listening on (for connect-failure tests).
    pub fn refused_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn serve(mut stream: TcpStream, store: Store, cas_counter: Arc<AtomicU64>, stop: Arc<AtomicBool>) {
    stream
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    let _ = stream.set_nodelay(true);

    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }

        let mut out = Vec::new();
        while consume_command(&mut buf, &store, &cas_counter, &mut out) {}
        if !out.is_empty() && stream.write_all(&out).is_err() {
            return;
        }

        match stream.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(_) => return,
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|pair| pair == b"\r\n")
}

fn parse_num(bytes: &[u8]) -> Option<u64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Process one complete command from `buf`, if present.
fn consume_command(
    buf: &mut Vec<u8>,
    store: &Store,
    cas_counter: &AtomicU64,
    out: &mut Vec<u8>,
) -> bool {
    let Some(line_end) = find_crlf(buf) else {
        return false;
    };
    let line = buf[..line_end].to_vec();
    let parts: Vec<Vec<u8>> = line.split(|&b| b == b' ').map(<[u8]>::to_vec).collect();
    let verb = parts[0].as_slice();

    match verb {
        b"set" | b"add" | b"replace" | b"append" | b"prepend" | b"cas" => {
            let len = parse_num(&parts[4]).unwrap() as usize;
            let total = line_end + 2 + len + 2;
            if buf.len() < total {
                return false;
            }
            let data = buf[line_end + 2..line_end + 2 + len].to_vec();
            buf.drain(..total);
            storage_command(verb, &parts, data, store, cas_counter, out);
            true
        }
        _ => {
            buf.drain(..line_end + 2);
            simple_command(verb, &parts, store, cas_counter, out);
            true
        }
    }
}

fn storage_command(
    verb: &[u8],
    parts: &[Vec<u8>],
    data: Vec<u8>,
    store: &Store,
    cas_counter: &AtomicU64,
    out: &mut Vec<u8>,
) {
    let key = parts[1].clone();
    if key.starts_with(b"__error__") {
        out.extend_from_slice(b"SERVER_ERROR boom\r\n");
        return;
    }
    let flags = parse_num(&parts[2]).unwrap() as u32;
    let mut map = store.lock().unwrap();
    let next_cas = || cas_counter.fetch_add(1, Ordering::Relaxed);

    let reply: &[u8] = match verb {
        b"set" => {
            map.insert(
                key,
                Entry {
                    flags,
                    data,
                    cas: next_cas(),
                },
            );
            b"STORED\r\n"
        }
        b"add" => {
            if map.contains_key(&key) {
                b"NOT_STORED\r\n"
            } else {
                map.insert(
                    key,
                    Entry {
                        flags,
                        data,
                        cas: next_cas(),
                    },
                );
                b"STORED\r\n"
            }
        }
        b"replace" => {
            if let std::collections::hash_map::Entry::Occupied(mut slot) = map.entry(key) {
                slot.insert(Entry {
                    flags,
                    data,
                    cas: next_cas(),
                });
                b"STORED\r\n"
            } else {
                b"NOT_STORED\r\n"
            }
        }
        b"append" | b"prepend" => match map.get_mut(&key) {
            Some(entry) => {
                if verb == b"append" {
                    entry.data.extend_from_slice(&data);
                } else {
                    let mut combined = data;
                    combined.extend_from_slice(&entry.data);
                    entry.data = combined;
                }
                entry.cas = next_cas();
                b"STORED\r\n"
            }
            None => b"NOT_STORED\r\n",
        },
        b"cas" => {
            let wanted = parse_num(&parts[5]).unwrap();
            match map.get_mut(&key) {
                Some(entry) if entry.cas == wanted => {
                    *entry = Entry {
                        flags,
                        data,
                        cas: next_cas(),
                    };
                    b"STORED\r\n"
                }
                Some(_) => b"EXISTS\r\n",
                None => b"NOT_FOUND\r\n",
            }
        }
        _ => b"ERROR\r\n",
    };
    out.extend_from_slice(reply);
}

fn simple_command(
    verb: &[u8],
    parts: &[Vec<u8>],
    store: &Store,
    cas_counter: &AtomicU64,
    out: &mut Vec<u8>,
) {
    match verb {
        b"get" | b"gets" => {
            let with_cas = verb == b"gets";
            let map = store.lock().unwrap();
            for key in &parts[1..] {
                if let Some(entry) = map.get(key) {
                    out.extend_from_slice(b"VALUE ");
                    out.extend_from_slice(key);
                    if with_cas {
                        out.extend_from_slice(
                            format!(" {} {} {}\r\n", entry.flags, entry.data.len(), entry.cas)
                                .as_bytes(),
                        );
                    } else {
                        out.extend_from_slice(
                            format!(" {} {}\r\n", entry.flags, entry.data.len()).as_bytes(),
                        );
                    }
                    out.extend_from_slice(&entry.data);
                    out.extend_from_slice(b"\r\n");
                }
            }
            out.extend_from_slice(b"END\r\n");
        }
        b"delete" => {
            let mut map = store.lock().unwrap();
            if map.remove(&parts[1]).is_some() {
                out.extend_from_slice(b"DELETED\r\n");
            } else {
                out.extend_from_slice(b"NOT_FOUND\r\n");
            }
        }
        b"incr" | b"decr" => {
            let by = parse_num(&parts[2]).unwrap();
            let mut map = store.lock().unwrap();
            match map.get_mut(&parts[1]) {
                Some(entry) => match parse_num(&entry.data) {
                    Some(current) => {
                        let next = if verb == b"incr" {
                            current.wrapping_add(by)
                        } else {
                            current.saturating_sub(by)
                        };
                        entry.data = next.to_string().into_bytes();
                        entry.cas = cas_counter.fetch_add(1, Ordering::Relaxed);
                        out.extend_from_slice(format!("{next}\r\n").as_bytes());
                    }
                    None => out.extend_from_slice(
                        b"CLIENT_ERROR cannot increment or decrement non-numeric value\r\n",
                    ),
                },
                None => out.extend_from_slice(b"NOT_FOUND\r\n"),
            }
        }
        b"flush_all" => {
            store.lock().unwrap().clear();
            out.extend_from_slice(b"OK\r\n");
        }
        b"version" => out.extend_from_slice(b"VERSION 1.6.0-mock\r\n"),
        b"stats" => {
            let items = store.lock().unwrap().len();
            out.extend_from_slice(b"STAT pid 1\r\n");
            out.extend_from_slice(format!("STAT curr_items {items}\r\n").as_bytes());
            out.extend_from_slice(b"END\r\n");
        }
        _ => out.extend_from_slice(b"ERROR\r\n"),
    }
}
