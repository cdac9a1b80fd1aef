use market_provider::defs::{DEFAULT_PING_TIMEOUT_SEC, DEFAULT_SERVICE_ID};
use market_provider::errors::CliError;
use market_provider::message::{DomainType, Message, MsgClass, MsgKey};
use market_provider::transport::consumer::{ConsumerConnection, ConsumerEvent};
use serde_json::json;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use structopt::StructOpt;

const LOGIN_STREAM: i32 = 1;
const DIRECTORY_STREAM: i32 = 2;
const FIRST_ITEM_STREAM: i32 = 5;
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Command-line options for the consumer
#[derive(Debug, StructOpt)]
#[structopt(name = "consumer", about = "Interactive consumer for the market data provider")]
struct Opt {
    /// Provider address, e.g., 127.0.0.1:14002
    #[structopt(short, long, default_value = "127.0.0.1:14002")]
    server_addr: String,

    /// Ping timeout to request, in seconds
    #[structopt(short, long)]
    ping_timeout: Option<u16>,

    /// Service id to request items from
    #[structopt(long)]
    service_id: Option<u16>,

    /// User name sent in the login request
    #[structopt(short, long, default_value = "consumer")]
    user: String,

    /// Offer the provider our dictionary download support
    #[structopt(long)]
    dictionary_download: bool,

    /// Market price items to open right after login
    #[structopt(short, long)]
    item: Vec<String>,
}

/// A line typed at the prompt.
#[derive(Debug, PartialEq)]
enum Command {
    MarketPrice(String),
    MarketByOrder(String),
    SymbolList,
    Dictionary(String),
    Snapshot(String),
    Close(i32),
    Exit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_lowercase();
    let arg = words.next();
    match (verb.as_str(), arg) {
        ("mp", Some(name)) => Ok(Command::MarketPrice(name.to_string())),
        ("mbo", Some(name)) => Ok(Command::MarketByOrder(name.to_string())),
        ("snap", Some(name)) => Ok(Command::Snapshot(name.to_string())),
        ("symbols", None) => Ok(Command::SymbolList),
        ("dict", Some(name)) => Ok(Command::Dictionary(name.to_string())),
        ("close", Some(stream)) => stream
            .parse()
            .map(Command::Close)
            .map_err(|_| format!("invalid stream id: {}", stream)),
        ("exit", None) => Ok(Command::Exit),
        _ => Err(format!("unknown command: {}", line.trim())),
    }
}

/// Streams opened from the prompt.
struct Streams {
    next: i32,
    open: HashMap<i32, DomainType>,
    service_id: u16,
}

impl Streams {
    fn new(service_id: u16) -> Self {
        Self {
            next: FIRST_ITEM_STREAM,
            open: HashMap::new(),
            service_id,
        }
    }

    fn request(&mut self, domain: DomainType, name: &str, streaming: bool) -> Message {
        let stream_id = self.next;
        self.next += 1;
        if streaming {
            self.open.insert(stream_id, domain);
        }
        let key = match domain {
            DomainType::Dictionary => MsgKey::named(name),
            _ => MsgKey::named(name).with_service(self.service_id),
        };
        Message {
            streaming,
            ..Message::request(domain, stream_id, key)
        }
    }

    /// Message for a prompt command; `None` for exit or an unknown stream.
    fn message_for(&mut self, command: Command) -> Option<Message> {
        match command {
            Command::MarketPrice(name) => Some(self.request(DomainType::MarketPrice, &name, true)),
            Command::MarketByOrder(name) => {
                Some(self.request(DomainType::MarketByOrder, &name, true))
            }
            Command::Snapshot(name) => Some(self.request(DomainType::MarketPrice, &name, false)),
            Command::SymbolList => Some(self.request(DomainType::SymbolList, "_ITEM_LIST", true)),
            Command::Dictionary(name) => Some(self.request(DomainType::Dictionary, &name, false)),
            Command::Close(stream_id) => match self.open.remove(&stream_id) {
                Some(domain) => Some(Message::close(domain, stream_id)),
                None => {
                    eprintln!("Stream {} is not open", stream_id);
                    None
                }
            },
            Command::Exit => None,
        }
    }
}

/// Reads prompt lines on a separate thread so the main loop can keep pinging.
fn spawn_prompt() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    eprintln!("Failed to read input: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

fn prompt() {
    print!("consumer> ");
    let _ = io::stdout().flush();
}

fn print_message(msg: &Message) {
    let state = msg
        .state
        .as_ref()
        .map(|s| format!(" {:?}/{:?} {:?} \"{}\"", s.stream, s.data, s.code, s.text))
        .unwrap_or_default();
    println!(
        "[{:?} {:?} stream {}]{} {}",
        msg.domain,
        msg.class,
        msg.stream_id,
        state,
        if msg.payload.is_null() {
            String::new()
        } else {
            msg.payload.to_string()
        }
    );
}

fn main() -> Result<(), CliError> {
    let opt = Opt::from_args();
    let ping_timeout = Duration::from_secs(opt.ping_timeout.unwrap_or(DEFAULT_PING_TIMEOUT_SEC) as u64);

    let mut conn = ConsumerConnection::connect(&opt.server_addr, ping_timeout, "consumer")?;
    println!(
        "Connected to {} ({}), ping timeout {:?}",
        opt.server_addr,
        conn.provider_component(),
        conn.ping_timeout()
    );

    let login = Message {
        payload: json!({
            "application_id": "256",
            "position": "127.0.0.1/net",
            "support_provider_dictionary_download": opt.dictionary_download,
        }),
        ..Message::request(DomainType::Login, LOGIN_STREAM, MsgKey::named(opt.user.clone()))
    };
    conn.send(&login)?;
    conn.send(&Message::request(
        DomainType::Source,
        DIRECTORY_STREAM,
        MsgKey::default(),
    ))?;

    let mut streams = Streams::new(opt.service_id.unwrap_or(DEFAULT_SERVICE_ID));
    for name in &opt.item {
        conn.send(&streams.request(DomainType::MarketPrice, name, true))?;
    }

    println!("Commands: mp NAME | mbo NAME | snap NAME | symbols | dict RWFFld|RWFEnum | close STREAM | exit");
    prompt();
    let input = spawn_prompt();
    let ping_interval = conn.ping_timeout() / 3;
    let mut next_ping = Instant::now() + ping_interval;

    loop {
        match input.try_recv() {
            Ok(line) if line.trim().is_empty() => prompt(),
            Ok(line) => {
                match parse_command(&line) {
                    Ok(Command::Exit) => {
                        println!("Exiting consumer.");
                        break;
                    }
                    Ok(command) => {
                        if let Some(msg) = streams.message_for(command) {
                            conn.send(&msg)?;
                        }
                    }
                    Err(e) => eprintln!("{}", e),
                }
                prompt();
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => break,
        }

        if Instant::now() >= next_ping {
            conn.send_ping()?;
            next_ping = Instant::now() + ping_interval;
        }

        match conn.next_event(POLL_INTERVAL)? {
            Some(ConsumerEvent::Message(msg)) => {
                if msg.class == MsgClass::Status && msg.domain == DomainType::Login {
                    print_message(&msg);
                    return Err(CliError::GeneralError("login closed by provider".into()));
                }
                print_message(&msg);
            }
            Some(ConsumerEvent::Ping) | None => {}
        }
    }

    Ok(())
}
