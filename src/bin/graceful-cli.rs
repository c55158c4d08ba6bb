use std::net::SocketAddr;

use clap::{Parser, Subcommand};

use graceful_net::http::X_SERVER_PID;
use graceful_net::rpc::RpcClient;

#[derive(Parser)]
#[command(name = "graceful-cli")]
#[command(about = "Client for poking a graceful-net server across reloads", long_about = None)]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:1111")]
    http_url: String,

    #[arg(long, default_value = "127.0.0.1:1112")]
    rpc_addr: SocketAddr,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// GET a path from the HTTP listener
    Http {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Call the RPC `get` method
    Get { id: String },
    /// Call the slow RPC `put` method
    Put { id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Http { path } => {
            let res = reqwest::get(format!("{}{}", cli.http_url.trim_end_matches('/'), path)).await?;
            let status = res.status();
            let pid = res
                .headers()
                .get(X_SERVER_PID)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown")
                .to_string();
            let body = res.text().await?;
            println!("{} (pid {})", status, pid);
            print!("{}", body);
        }
        Commands::Get { id } => {
            let mut client = RpcClient::connect(cli.rpc_addr).await?;
            let response = client.get(&id).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Put { id } => {
            let mut client = RpcClient::connect(cli.rpc_addr).await?;
            let response = client.put(&id).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}
