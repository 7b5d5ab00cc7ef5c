//! Interactive shell for scanning, transmitting, and correlating Exposure
//! Notification beacons.

use enscan_core::{
    address::Address,
    engine::Engine,
    error::{Error, ErrorKind, Result},
    hci::{HciSocket, ReportSource},
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;

const HISTORY_FILE: &str = ".bthistory";

type CliEngine = Engine<HciSocket>;
type Handler = fn(&mut CliEngine, &[String]) -> Result<()>;

struct Command {
    name: &'static str,
    help: &'static str,
    run: Handler,
}

const COMMANDS: &[Command] = &[
    Command { name: "dev", help: "[hciX]\n\n\tList Bluetooth adapters or select one for subsequent commands\n", run: cmd_dev },
    Command {
        name: "lerandaddr",
        help: "[BDADDR]\n\n\tDisplay or set the selected adapter's BLE random address\n",
        run: cmd_lerandaddr,
    },
    Command { name: "ga_rpi", help: "[32hex]\n\n\tDisplay or set the RPI advertised by 'beacon'\n", run: cmd_ga_rpi },
    Command { name: "ga_aem", help: "[8hex]\n\n\tDisplay or set the AEM advertised by 'beacon'\n", run: cmd_ga_aem },
    Command { name: "beacon", help: "\n\n\tAdvertise an Exposure Notification beacon until interrupted\n", run: cmd_beacon },
    Command { name: "scan", help: "\n\n\tScan for Exposure Notification beacons until interrupted\n", run: cmd_scan },
    Command {
        name: "bonding",
        help: "[NAME --bda BDADDR | --irk 32hex]\n\n\tList known bondings, or add/update one\n",
        run: cmd_bonding,
    },
    Command {
        name: "resolve_rpa",
        help: "BDADDR 32hex\n\n\tCheck whether BDADDR resolves against the given IRK\n",
        run: cmd_resolve_rpa,
    },
    Command {
        name: "track",
        help: "[--dump FILE | --load FILE]\n\n\tRun the merge engine and print distinct identities seen,\n\tor dump/load the capture to/from a CSV file\n",
        run: cmd_track,
    },
    Command { name: "help", help: "[COMMAND]\n\n\tList available commands\n", run: cmd_help },
    Command { name: "?", help: "Synonym for 'help'", run: cmd_help },
    Command { name: "quit", help: "Exit the program", run: cmd_quit },
];

fn find_command(name: &str) -> Option<&'static Command> {
    COMMANDS.iter().find(|c| c.name == name)
}

fn cmd_dev(engine: &mut CliEngine, args: &[String]) -> Result<()> {
    if args.is_empty() {
        for (id, name, addr) in enscan_core::hci::list_devices()? {
            println!("{name} (hci{id})\t{addr}");
        }
        return Ok(());
    }
    let device = HciSocket::open_named(&args[0])?;
    println!("selected {}", args[0]);
    engine.set_device(device);
    Ok(())
}

fn cmd_lerandaddr(engine: &mut CliEngine, args: &[String]) -> Result<()> {
    if args.is_empty() {
        match engine.device().and_then(ReportSource::address) {
            Some(addr) => println!("Random BA: {addr}"),
            None => println!("Random BA: (unset)"),
        }
        return Ok(());
    }
    let addr: Address = args[0].parse()?;
    engine.set_random_address(addr)?;
    println!("Random BA: {addr}");
    Ok(())
}

fn parse_hex_exact(s: &str, what: &'static str, expected: usize) -> Result<Vec<u8>> {
    if s.len() != expected {
        return Err(Error::new(ErrorKind::InvalidHexLength { what, expected, got: s.len() }));
    }
    Ok(hex::decode(s)?)
}

fn cmd_ga_rpi(engine: &mut CliEngine, args: &[String]) -> Result<()> {
    if !args.is_empty() {
        let bytes = parse_hex_exact(&args[0], "RPI", 32)?;
        let rpi: [u8; 16] = bytes.try_into().unwrap();
        engine.set_pending_rpi(rpi);
    }
    println!("RPI: {}", hex::encode(engine.pending_rpi()));
    Ok(())
}

fn cmd_ga_aem(engine: &mut CliEngine, args: &[String]) -> Result<()> {
    if !args.is_empty() {
        let bytes = parse_hex_exact(&args[0], "AEM", 8)?;
        let aem: [u8; 4] = bytes.try_into().unwrap();
        engine.set_pending_aem(aem);
    }
    println!("AEM: {}", hex::encode(engine.pending_aem()));
    Ok(())
}

fn cmd_beacon(engine: &mut CliEngine, args: &[String]) -> Result<()> {
    if !args.is_empty() {
        return Err(Error::new(ErrorKind::WrongArgumentCount));
    }
    println!("EN BLE advertising ... (Ctrl-C to stop)");
    with_sigint_cancellation(|cancel| engine.beacon(cancel))
}

fn cmd_scan(engine: &mut CliEngine, args: &[String]) -> Result<()> {
    if !args.is_empty() {
        return Err(Error::new(ErrorKind::WrongArgumentCount));
    }
    println!("EN BLE Scan ... (Ctrl-C to stop)");
    with_sigint_cancellation(|cancel| engine.scan(cancel))
}

fn cmd_bonding(engine: &mut CliEngine, args: &[String]) -> Result<()> {
    if args.is_empty() {
        for b in engine.bondings().iter() {
            println!("{b}");
        }
        return Ok(());
    }

    let mut name = String::new();
    let mut bda_public = None;
    let mut irk = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--bda" => {
                i += 1;
                let addr: Address = args.get(i).ok_or_else(|| Error::new(ErrorKind::WrongArgumentCount))?.parse()?;
                bda_public = Some(addr);
            }
            "--irk" => {
                i += 1;
                let hex_str = args.get(i).ok_or_else(|| Error::new(ErrorKind::WrongArgumentCount))?;
                let bytes = parse_hex_exact(hex_str, "IRK", 32)?;
                irk = Some(<[u8; 16]>::try_from(bytes).unwrap());
            }
            other => name = other.to_string(),
        }
        i += 1;
    }

    engine.bondings_mut().upsert(enscan_core::bonding::Bonding { name, bda_public, irk });
    Ok(())
}

fn cmd_resolve_rpa(_engine: &mut CliEngine, args: &[String]) -> Result<()> {
    if args.len() != 2 {
        return Err(Error::new(ErrorKind::WrongArgumentCount));
    }
    let addr: Address = args[0].parse()?;
    let bytes = parse_hex_exact(&args[1], "IRK", 32)?;
    let irk: [u8; 16] = bytes.try_into().unwrap();
    println!("{}", enscan_core::rpa::resolve(&addr, &irk));
    Ok(())
}

fn cmd_track(engine: &mut CliEngine, args: &[String]) -> Result<()> {
    if args.len() == 2 && args[0] == "--dump" {
        return engine.dump(&args[1]);
    }
    if args.len() == 2 && args[0] == "--load" {
        return engine.load(&args[1]);
    }
    if !args.is_empty() {
        return Err(Error::new(ErrorKind::WrongArgumentCount));
    }

    let merges = engine.track();
    log::debug!("merge engine performed {merges} merges");
    for s in engine.sightings() {
        println!("Device {}, {} rpi={} aem={} rssi={}", s.stream_idx, s.bda, hex::encode(s.rpi), hex::encode(s.aem), s.rssi);
    }
    Ok(())
}

fn cmd_help(_engine: &mut CliEngine, args: &[String]) -> Result<()> {
    if args.is_empty() {
        println!("List of available commands printed below.\nUse 'help command' to display detailed description\n");
        for (i, c) in COMMANDS.iter().enumerate() {
            print!("{}\t\t", c.name);
            if (i + 1) % 5 == 0 {
                println!();
            }
        }
        println!();
        return Ok(());
    }
    match find_command(&args[0]) {
        Some(c) => println!("{}\t{}", c.name, c.help),
        None => println!("{}: no such command, try 'help'", args[0]),
    }
    Ok(())
}

fn cmd_quit(_engine: &mut CliEngine, _args: &[String]) -> Result<()> {
    std::process::exit(0);
}

static CANCEL_PTR: AtomicPtr<AtomicBool> = AtomicPtr::new(std::ptr::null_mut());

extern "C" fn on_sigint(_sig: libc::c_int) {
    let ptr = CANCEL_PTR.load(Ordering::SeqCst);
    if !ptr.is_null() {
        unsafe { (*ptr).store(true, Ordering::SeqCst) };
    }
}

/// Installs a `SIGINT` handler for the duration of `f`, which receives a
/// freshly-constructed cancellation token that the handler sets on Ctrl-C.
/// Restores the default disposition before returning.
fn with_sigint_cancellation<T>(f: impl FnOnce(&Arc<AtomicBool>) -> T) -> T {
    let cancel = Arc::new(AtomicBool::new(false));
    CANCEL_PTR.store(Arc::as_ptr(&cancel) as *mut AtomicBool, Ordering::SeqCst);
    unsafe {
        libc::signal(libc::SIGINT, on_sigint as usize);
    }

    let result = f(&cancel);

    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_DFL);
    }
    CANCEL_PTR.store(std::ptr::null_mut(), Ordering::SeqCst);
    result
}

/// Splits a line into arguments, honouring double-quoted substrings, the
/// way the reference's `tokenizestr` does (quotes are stripped, not
/// preserved as literal characters).
fn tokenize(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

fn execute_line(engine: &mut CliEngine, line: &str) {
    let tokens = tokenize(line);
    let Some((name, args)) = tokens.split_first() else { return };

    match find_command(name) {
        Some(command) => {
            if let Err(e) = (command.run)(engine, args) {
                eprintln!("{e}");
            }
        }
        None => eprintln!("{name}: no such command, try 'help'"),
    }
}

fn main() {
    env_logger::init();

    let mut engine: CliEngine = Engine::new();
    let args: Vec<String> = std::env::args().skip(1).collect();

    if !args.is_empty() {
        let Some(command) = find_command(&args[0]) else {
            eprintln!("usage: enscan [command] [command parameters]");
            std::process::exit(1);
        };
        match (command.run)(&mut engine, &args[1..]) {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    }

    let mut rl = DefaultEditor::new().expect("failed to initialise line editor");
    let _ = rl.load_history(HISTORY_FILE);

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);
                let _ = rl.append_history(HISTORY_FILE);
                execute_line(&mut engine, trimmed);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_on_whitespace() {
        assert_eq!(tokenize("dev hci0"), vec!["dev", "hci0"]);
    }

    #[test]
    fn tokenize_honours_quotes() {
        assert_eq!(tokenize(r#"bonding "my phone" --bda AA:BB:CC:DD:EE:FF"#), vec!["bonding", "my phone", "--bda", "AA:BB:CC:DD:EE:FF"]);
    }

    #[test]
    fn tokenize_empty_line_yields_no_tokens() {
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn find_command_resolves_question_mark_alias() {
        assert!(find_command("?").is_some());
        assert!(find_command("nonexistent").is_none());
    }
}
