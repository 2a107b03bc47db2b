use clap::{App, Arg};
use ppcb::client::Client;
use ppcb::logging;
use ppcb::shared::Mode;
use std::io::{self, Read};
use std::net::{SocketAddr, ToSocketAddrs};
use std::process;

fn fatal(message: &str) -> ! {
    eprintln!("ERROR: {}", message);
    process::exit(1);
}

/// First IPv4 address the system resolver yields for the host.
fn resolve(host: &str, port: u16) -> SocketAddr {
    match (host, port).to_socket_addrs() {
        Ok(mut addrs) => match addrs.find(SocketAddr::is_ipv4) {
            Some(addr) => addr,
            None => fatal(&format!("{} has no IPv4 address", host)),
        },
        Err(_) => fatal(&format!("cannot resolve host {}", host)),
    }
}

fn main() {
    let matches = App::new("ppcbc")
        .about("Ships a payload read from standard input to a receiving server.")
        .arg(
            Arg::with_name("PROTOCOL")
                .help("Transport protocol: tcp, udp or udpr")
                .required(true),
        )
        .arg(
            Arg::with_name("HOST")
                .help("Server host name or address")
                .required(true),
        )
        .arg(Arg::with_name("PORT").help("Server port").required(true))
        .get_matches();

    let logger = logging::init();

    let protocol = matches.value_of("PROTOCOL").unwrap();
    let mode = match Mode::from_token(protocol) {
        Some(mode) => mode,
        None => fatal(&format!("invalid client protocol: {}", protocol)),
    };

    let port_token = matches.value_of("PORT").unwrap();
    let port = match port_token.parse::<u16>() {
        Ok(port) => port,
        Err(_) => fatal(&format!("{} is not a valid port number", port_token)),
    };
    let addr = resolve(matches.value_of("HOST").unwrap(), port);

    let mut payload = Vec::new();
    if let Err(err) = io::stdin().read_to_end(&mut payload) {
        fatal(&format!("reading standard input failed: {}", err));
    }

    let mut client = match Client::connect(mode, addr, &logger) {
        Ok(client) => client,
        Err(err) => {
            logging::error!(logger, "failed to connect"; "peer" => %addr, "kind" => ?err);
            process::exit(1);
        }
    };

    if let Err(err) = client.send_all(&payload) {
        logging::error!(logger, "transfer failed"; "kind" => ?err);
        process::exit(1);
    }
}
