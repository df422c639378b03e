use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "examrun", version, about = "Take a timed platform test from the terminal")]
pub struct Cli {
    /// Id of the test to take
    pub test_id: u64,

    /// Topic the test belongs to; decides where to go once the attempt ends
    #[arg(long, value_name = "id")]
    pub topic_id: Option<u64>,

    /// REST base URL [env: EXAMRUN_API_URL]
    #[arg(long, value_name = "url")]
    pub api_url: Option<String>,

    /// Bearer access token [env: EXAMRUN_TOKEN]
    #[arg(long, value_name = "token")]
    pub token: Option<String>,

    /// Directory holding saved sessions [env: EXAMRUN_STATE_DIR]
    #[arg(long, value_name = "dir")]
    pub state_dir: Option<PathBuf>,

    /// Clear saved state for this test before doing anything else
    #[arg(long)]
    pub clear: bool,

    /// Show saved progress without contacting the server
    #[arg(long)]
    pub status: bool,

    /// Export saved answers to a file (for backup)
    #[arg(long, value_name = "path")]
    pub export: Option<PathBuf>,
}
