use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(version, about = "A cli for interacting with the bramble-cni agent", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand, Debug)]
pub enum Commands {
    /// Used to interact with the policy subsystem
    #[command(subcommand)]
    Policy(PolicyCommands),

    /// Expand embedded JSON in a diagnostic dump and pretty-print it
    Inspect {
        /// Path to the dump; reads stdin when omitted
        file: Option<PathBuf>,
    },
}

#[derive(Clone, Subcommand, Debug)]
pub enum PolicyCommands {
    /// Insert an allow entry into the policy filter map
    Update(UpdateArgs),

    /// Remove an allow entry from the policy filter map
    Delete(UpdateArgs),

    /// Resolve the L4 policy for a label context and print the filters
    Trace(TraceArgs),
}

#[derive(Clone, Args, Debug)]
pub struct UpdateArgs {
    /// Numeric endpoint ID or the name of a reserved identity
    pub endpoint_id: String,

    /// Traffic direction (ingress or egress)
    pub direction: String,

    /// Numeric identity of the peer
    pub peer_label: String,

    /// Optional port spec: <port> or <port>/<proto>
    pub port_spec: Option<String>,
}

#[derive(Clone, Args, Debug)]
pub struct TraceArgs {
    /// Path to a JSON file containing the rules to import
    #[arg(long)]
    pub rules: PathBuf,

    /// Destination labels (key=value, comma separated)
    #[arg(long, value_delimiter = ',')]
    pub to: Vec<String>,

    /// Source labels (key=value, comma separated)
    #[arg(long, value_delimiter = ',')]
    pub from: Vec<String>,

    /// Resolve egress instead of ingress
    #[arg(long)]
    pub egress: bool,

    /// Print the resolver trace
    #[arg(long)]
    pub verbose: bool,

    /// Print the resolved filters as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}
