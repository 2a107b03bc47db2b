use clap::{App, Arg};
use ppcb::logging;
use ppcb::server::{DatagramServer, StreamServer};
use ppcb::shared::Mode;
use std::io;
use std::process;

fn fatal(message: &str) -> ! {
    eprintln!("ERROR: {}", message);
    process::exit(1);
}

fn main() {
    let matches = App::new("ppcbs")
        .about("Receives one payload at a time and writes it to standard output.")
        .arg(
            Arg::with_name("PROTOCOL")
                .help("Transport protocol: tcp or udp")
                .required(true),
        )
        .arg(Arg::with_name("PORT").help("Listening port").required(true))
        .get_matches();

    let logger = logging::init();

    let protocol = matches.value_of("PROTOCOL").unwrap();
    let mode = match Mode::from_token(protocol) {
        Some(Mode::Stream) => Mode::Stream,
        Some(Mode::Datagram) => Mode::Datagram,
        // The retransmitting variant is requested by clients; the server
        // follows each session's CONN.
        _ => fatal(&format!("invalid server protocol: {}", protocol)),
    };

    let port_token = matches.value_of("PORT").unwrap();
    let port = match port_token.parse::<u16>() {
        Ok(port) => port,
        Err(_) => fatal(&format!("{} is not a valid port number", port_token)),
    };

    let mut out = io::stdout();
    let result = match mode {
        Mode::Stream => {
            StreamServer::bind(port, &logger).and_then(|mut server| server.run(&mut out))
        }
        _ => DatagramServer::bind(port, &logger).and_then(|mut server| server.run(&mut out)),
    };

    if let Err(err) = result {
        logging::error!(logger, "server failed"; "kind" => ?err);
        process::exit(1);
    }
}
