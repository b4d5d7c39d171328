use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracejob::bundle::{DEFAULT_INIT_IMAGE, DEFAULT_TRACE_IMAGE};
use tracejob::AttachConfig;
use uuid::Uuid;

/// Schedule bpftrace programs on cluster nodes
#[derive(Debug, Parser)]
#[clap(name = "kubectl-trace", version)]
pub struct ArgParser {
    /// Namespace the traces live in, defaults to the kubeconfig context's
    #[clap(short = 'n', long = "namespace", env = "KUBECTL_TRACE_NAMESPACE")]
    pub namespace: Option<String>,
    /// The sub-command to use
    #[clap(subcommand)]
    pub sub_command: SubCommand,
}

#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
pub enum SubCommand {
    /// run a bpftrace program on a node
    Run {
        /// target node, as NAME or node/NAME
        resource: String,

        #[clap(short = 'e', long, conflicts_with = "filename", required_unless_present = "filename")]
        /// literal string to be evaluated as a bpftrace program
        eval: Option<String>,

        #[clap(short = 'f', long)]
        /// file containing a bpftrace program
        filename: Option<PathBuf>,

        #[clap(short = 'a', long)]
        /// attach to the trace once it is created
        attach: bool,

        #[clap(long, env = "KUBECTL_TRACE_INIT_IMAGE", default_value = DEFAULT_INIT_IMAGE)]
        /// image preparing the node's kernel headers
        init_image: String,

        #[clap(long, env = "KUBECTL_TRACE_IMAGE", default_value = DEFAULT_TRACE_IMAGE)]
        /// image running bpftrace
        image: String,

        #[clap(flatten)]
        attach_args: AttachArgs,
    },
    /// list traces and their status
    Get {
        /// Uuid v4 string, lists every trace when omitted
        trace_id: Option<Uuid>,
    },
    /// delete a trace and its program
    Delete {
        /// Uuid v4 string
        #[clap(name = "trace_id", required_unless_present = "all")]
        trace_id: Option<Uuid>,

        #[clap(long, conflicts_with = "trace_id")]
        /// delete every trace in the namespace
        all: bool,
    },
    /// stream the output of an existing trace
    Attach {
        /// Uuid v4 string
        trace_id: Uuid,

        #[clap(flatten)]
        attach_args: AttachArgs,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Args)]
pub struct AttachArgs {
    #[clap(long)]
    /// stop the remote trace on Ctrl-C instead of leaving it running
    pub stop_on_interrupt: bool,

    #[clap(long)]
    /// relay stderr along with stdout
    pub stderr: bool,

    #[clap(long, default_value = "1000")]
    /// wait between status polls while the trace is pending
    pub poll_interval_ms: u64,
}

impl AttachArgs {
    pub fn to_config(&self) -> AttachConfig {
        AttachConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            stderr: self.stderr,
            stop_on_cancel: self.stop_on_interrupt,
            ..AttachConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_requires_exactly_one_program_source() {
        assert!(ArgParser::try_parse_from(["kubectl-trace", "run", "nodeA"]).is_err());
        assert!(ArgParser::try_parse_from([
            "kubectl-trace",
            "run",
            "nodeA",
            "-e",
            "BEGIN {}",
            "-f",
            "read.bt"
        ])
        .is_err());
        let args = ArgParser::try_parse_from(["kubectl-trace", "run", "node/nodeA", "-e", "BEGIN {}", "-a"])
            .expect("valid run");
        match args.sub_command {
            SubCommand::Run { resource, eval, attach, .. } => {
                assert_eq!(resource, "node/nodeA");
                assert_eq!(eval.as_deref(), Some("BEGIN {}"));
                assert!(attach);
            }
            other => panic!("unexpected sub command {:?}", other),
        }
    }

    #[test]
    fn delete_needs_an_id_or_all() {
        let id = "8d6f2f0e-7c1e-4a57-9a44-3c1f4b7f9a10";
        assert!(ArgParser::try_parse_from(["kubectl-trace", "delete"]).is_err());
        assert!(ArgParser::try_parse_from(["kubectl-trace", "delete", id, "--all"]).is_err());

        let args = ArgParser::try_parse_from(["kubectl-trace", "delete", "--all"]).expect("delete all");
        assert_eq!(
            args.sub_command,
            SubCommand::Delete {
                trace_id: None,
                all: true
            }
        );
        let args = ArgParser::try_parse_from(["kubectl-trace", "delete", id]).expect("delete one");
        assert_eq!(
            args.sub_command,
            SubCommand::Delete {
                trace_id: Some(Uuid::parse_str(id).unwrap()),
                all: false
            }
        );
    }

    #[test]
    fn arguments_are_consistent() {
        use clap::CommandFactory;
        ArgParser::command().debug_assert();
    }
}
