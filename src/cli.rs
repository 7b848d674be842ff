use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "convertbox")]
#[command(about = "ConvertBox file conversion service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Server(ServerArgs),
    /// Convert one local file and exit
    Convert(ConvertArgs),
    /// Show the formats a file can be converted to
    Formats(FormatsArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to (overrides `server.bind_addr`)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct ConvertArgs {
    /// File to convert
    pub input: PathBuf,
    /// Destination; its extension selects the target format
    pub output: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct FormatsArgs {
    /// File name to resolve, e.g. `photos.tar.gz`
    pub filename: String,
}
