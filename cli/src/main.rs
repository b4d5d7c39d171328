mod arg_parser;
mod target;
mod trace_cli;

use arg_parser::{ArgParser, SubCommand};
use trace_cli::TraceCli;

use clap::Parser;
use std::error;
use std::process::ExitCode;
use tracejob::{BundleConfig, JobFilter};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = ArgParser::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr so trace output on stdout stays verbatim.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(args: ArgParser) -> Result<(), Box<dyn error::Error>> {
    let namespace = args.namespace;

    match args.sub_command {
        SubCommand::Run {
            resource,
            eval,
            filename,
            attach,
            init_image,
            image,
            attach_args,
        } => {
            // validate the program before talking to the cluster
            let program = trace_cli::load_program(eval, filename.as_deref()).await?;
            let cli = TraceCli::connect(namespace).await?;
            let bundle = BundleConfig {
                init_image,
                trace_image: image,
                ..BundleConfig::default()
            };
            let attach = attach.then(|| attach_args.to_config());
            cli.run_trace(&resource, program, bundle, attach).await?;
        }
        SubCommand::Get { trace_id } => {
            let cli = TraceCli::connect(namespace).await?;
            cli.get_traces(trace_id).await?;
        }
        SubCommand::Delete { trace_id, all } => {
            let filter = match (trace_id, all) {
                (Some(id), _) => JobFilter::Id(id),
                (None, true) => JobFilter::All,
                (None, false) => return Err("specify a trace id or --all".into()),
            };
            let cli = TraceCli::connect(namespace).await?;
            cli.delete_traces(filter).await?;
        }
        SubCommand::Attach {
            trace_id,
            attach_args,
        } => {
            let cli = TraceCli::connect(namespace).await?;
            cli.attach_trace(trace_id, attach_args.to_config()).await?;
        }
    }

    Ok(())
}
