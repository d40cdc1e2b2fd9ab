//! Command line arguments for the server and client programs.

use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;


const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8000";
const DEFAULT_MESSAGE_NUM: usize = 500;


/// Relay live order books from several exchanges to WebSocket viewers.
#[derive(Parser, Debug)]
#[command(name = "server", version)]
pub struct ServerArgs {
    /// JSON settings file; built-in defaults when absent.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on, overriding the settings file.
    #[arg(short, long)]
    pub listen: Option<String>,

    #[arg(long, default_value = "info")]
    pub log_level: LevelFilter,
}

/// Connect to a relay, send commands and print the frames it sends back.
#[derive(Parser, Debug)]
#[command(name = "client", version)]
pub struct ClientArgs {
    #[arg(short, long, default_value = DEFAULT_SERVER_URL)]
    pub url: String,

    /// Number of frames to print before exiting.
    #[arg(short = 'n', long, default_value_t = DEFAULT_MESSAGE_NUM)]
    pub messages: usize,

    /// Commands to send after connecting, as JSON objects,
    /// e.g. '{"action":"add_token","token":"XMR"}'.
    pub commands: Vec<String>,

    #[arg(long, default_value = "info")]
    pub log_level: LevelFilter,
}
