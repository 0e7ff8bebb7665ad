// Kite TFTP client binary: interactive shell issuing read requests.

use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::process;

use clap::Parser;
use kite_tftp::client::{GetOutcome, TftpClient};
use kite_tftp::packet::TransferMode;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

/// Interactive TFTP read client
#[derive(Parser, Debug)]
#[command(name = "kite-tftp-client")]
#[command(about = "Interactive TFTP read client", long_about = None)]
struct Cli {
    /// TFTP server IP address
    server_ip: IpAddr,

    /// TFTP server port
    server_port: u16,

    /// Log level filter (e.g. warn, kite_tftp=debug)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_target(false)
        .init();

    let mut client = TftpClient::new(SocketAddr::new(cli.server_ip, cli.server_port));

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                error!("error reading command: {}", e);
                break;
            }
        }

        let args: Vec<&str> = line.split_whitespace().collect();
        match args.as_slice() {
            [] => {
                println!("Comando non riconosciuto : ''");
                print_commands();
            }
            ["!help"] => print_commands(),
            ["!help", ..] => println!("Il comando non richiede argomenti"),
            ["!mode", new_mode] => set_mode(&mut client, new_mode),
            ["!mode", ..] => println!("Il comando richiede un solo argomento: bin o txt"),
            ["!get", remote, local] => run_get(&client, remote, local).await,
            ["!get", ..] => {
                println!("Il comando richiede due argomenti: <filename> e <nome_locale>")
            }
            ["!quit"] => {
                println!("Client terminato con successo");
                process::exit(0);
            }
            ["!quit", ..] => println!("Il comando non richiede argomenti"),
            [command, ..] => {
                println!("Comando non riconosciuto : '{}'", command);
                print_commands();
            }
        }
    }
}

fn print_commands() {
    println!("Sono disponibili i seguenti comandi:");
    println!("!help --> mostra l'elenco dei comandi disponibili");
    println!("!mode {{txt|bin}} --> imposta il modo di trasferimento dei file (testo o binario)");
    println!(
        "!get filename nome_locale --> richiede al server il file <filename> e lo salva localmente con il nome <nome_locale>"
    );
    println!("!quit --> termina il client");
}

fn set_mode(client: &mut TftpClient, new_mode: &str) {
    match new_mode {
        "txt" => {
            client.mode = TransferMode::Netascii;
            println!("Modo di trasferimento testo configurato");
        }
        "bin" => {
            client.mode = TransferMode::Octet;
            println!("Modo di trasferimento binario configurato");
        }
        other => {
            println!(
                "Modo di trasferimento sconosciuto: {}. Modi disponibili: txt, bin",
                other
            );
        }
    }
}

async fn run_get(client: &TftpClient, remote: &str, local: &str) {
    println!(
        "Richiesta file {} ({}) al server in corso.",
        remote, client.mode
    );
    println!("Trasferimento file in corso.");

    match client.get(remote, Path::new(local)).await {
        Ok(GetOutcome::Complete(report)) => {
            println!(
                "Trasferimento completato ({}/{} blocchi)",
                report.blocks, report.blocks
            );
            println!("Salvataggio {} completato.", local);
        }
        Ok(GetOutcome::NotFound) => println!("File non trovato."),
        Err(e) => {
            debug!("get failed: {:?}", e);
            error!("trasferimento non riuscito: {}", e);
        }
    }
}
