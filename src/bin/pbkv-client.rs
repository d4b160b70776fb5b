use clap::{Parser, Subcommand};
use pbkv::grpc::grpc_kv_frontend_client::GrpcKvFrontendClient;
use pbkv::grpc::{ProtoGetRequest, ProtoPutRequest};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tonic::transport::Channel;
use tonic::Code;

/// Command-line client for the pbkv dispatcher.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct App {
    /// Dispatcher endpoint, host:port.
    #[clap(long, global = true, default_value = "127.0.0.1:8000")]
    dispatcher: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store VALUE under KEY.
    Put { key: String, value: String },
    /// Print the value stored under KEY, or `(nil)` if there is none.
    Get { key: String },
    /// Interactive loop reading `put KEY VALUE` / `get KEY` lines from stdin.
    Shell,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let app = App::parse();

    let mut client = GrpcKvFrontendClient::connect(format!("http://{}", app.dispatcher)).await?;

    match app.command {
        Command::Put { key, value } => match put(&mut client, key, value).await {
            Ok(true) => println!("OK"),
            Ok(false) => {
                eprintln!("(error) put refused by the current primary");
                std::process::exit(1);
            }
            Err(status) => exit_for_status(status),
        },
        Command::Get { key } => match get(&mut client, key).await {
            Ok(Some(value)) => println!("{}", value),
            Ok(None) => println!("(nil)"),
            Err(status) => exit_for_status(status),
        },
        Command::Shell => shell(&mut client).await?,
    }

    Ok(())
}

async fn put(
    client: &mut GrpcKvFrontendClient<Channel>,
    key: String,
    value: String,
) -> Result<bool, tonic::Status> {
    let reply = client.put(ProtoPutRequest { key, value }).await?;

    Ok(reply.into_inner().ok)
}

async fn get(
    client: &mut GrpcKvFrontendClient<Channel>,
    key: String,
) -> Result<Option<String>, tonic::Status> {
    let reply = client.get(ProtoGetRequest { key }).await?;

    let reply = reply.into_inner();
    if reply.found {
        Ok(Some(reply.value))
    } else {
        Ok(None)
    }
}

fn exit_for_status(status: tonic::Status) -> ! {
    if status.code() == Code::Unavailable {
        eprintln!("(error) service unavailable: {}", status.message());
        std::process::exit(2);
    }
    eprintln!("(error) {}", status);
    std::process::exit(1);
}

/// Line-per-command loop. Unlike the one-shot subcommands, errors are printed
/// and the loop keeps going; the dispatcher may come back.
async fn shell(
    client: &mut GrpcKvFrontendClient<Channel>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt();
    while let Some(line) = lines.next_line().await? {
        let tokens: Vec<&str> = line.split_whitespace().collect();

        match tokens.as_slice() {
            [] => {}
            ["exit"] | ["quit"] => break,
            ["put", key, value] => {
                match put(client, (*key).to_owned(), (*value).to_owned()).await {
                    Ok(true) => println!("OK"),
                    Ok(false) => println!("(error) put refused by the current primary"),
                    Err(status) => println!("(error) {}", status.message()),
                }
            }
            ["get", key] => match get(client, (*key).to_owned()).await {
                Ok(Some(value)) => println!("{}", value),
                Ok(None) => println!("(nil)"),
                Err(status) => println!("(error) {}", status.message()),
            },
            _ => println!("usage: put KEY VALUE | get KEY | exit"),
        }
        prompt();
    }

    Ok(())
}

fn prompt() {
    print!("pbkv> ");
    let _ = std::io::stdout().flush();
}
