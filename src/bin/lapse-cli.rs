//! LAPSE CLI Client
//!
//! Interactive command-line client for the activity ingress.

use clap::Parser;
use lapse::server::{Client, Command};
use std::io::{self, Write};

/// LAPSE CLI - Interactive Client
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 7460)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    println!("Connecting to LAPSE at {}...", addr);

    let mut client = Client::connect(&addr).await?;

    println!("Connected! Type 'help' for available commands, 'quit' to exit.\n");

    loop {
        print!("lapse> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit") {
            println!("Goodbye!");
            break;
        }

        if input.eq_ignore_ascii_case("help") {
            print_help();
            continue;
        }

        // Validate locally so typos never reach the server
        match Command::parse(input) {
            Ok(cmd) => println!("{}", client.raw(&cmd.to_line()).await?),
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"
Available commands:

  PING                         - Check server connectivity
  ACTIVITY <id> [timeout_ms]   - Report activity, sliding the deadline
  STOP <id>                    - Report that a workspace stopped
  EXPIRES <id>                 - Show the current deadline
  STATS                        - Show sweeper counters

  help                         - Show this help
  quit / exit                  - Exit the CLI

Examples:
  ACTIVITY ws-1
  ACTIVITY ws-1 600000   (idle for 10 minutes before expiry)
  EXPIRES ws-1
  STOP ws-1
"#
    );
}
