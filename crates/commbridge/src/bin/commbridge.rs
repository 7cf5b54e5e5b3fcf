use std::process;
use std::time::Duration;

use anyhow::Context;
use serde_json::{Value, json};

use commbridge::bridge::link;
use commbridge::host::{ClassicManager, CommManager};
use commbridge::{BridgeConfig, EndpointBridge, EndpointError, ObjectTarget, Refs, arg};

struct Args {
    target: String,
    instance: Option<String>,
}

#[tokio::main]
async fn main() {
    commbridge::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let args = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!();
            eprintln!("Usage: commbridge --target <name> [--instance <id>]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --target <name>    Well-known target of the backend widget [env: COMMBRIDGE_TARGET]");
            eprintln!("  --instance <id>    Fixed channel suffix [default: random]");
            process::exit(2);
        }
    };

    if let Err(e) = run(args).await {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut target = std::env::var("COMMBRIDGE_TARGET").ok();
    let mut instance = None;

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--target" => {
                i += 1;
                target = Some(args.get(i).ok_or("--target requires a value")?.clone());
            }
            "--instance" => {
                i += 1;
                instance = Some(args.get(i).ok_or("--instance requires a value")?.clone());
            }
            "--help" | "-h" => return Err("".to_string()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    let target = target.ok_or("missing required option: --target")?;
    Ok(Args { target, instance })
}

async fn run(args: Args) -> anyhow::Result<()> {
    let (manager, frames) = CommManager::new();
    let mut link_task = tokio::spawn(link::serve(
        manager.clone(),
        frames,
        tokio::io::stdin(),
        tokio::io::stdout(),
    ));

    let mut config = BridgeConfig::new(args.target);
    if let Some(instance) = args.instance {
        config = config.with_instance_id(instance);
    }

    let refs = Refs::new();
    refs.insert("demo", demo_target());

    let host = ClassicManager::new(manager);
    let bridge = tokio::select! {
        bridge = EndpointBridge::connect(&host, &config, refs) => {
            bridge.context("channel setup failed")?
        }
        linked = &mut link_task => {
            linked.context("link task panicked")?.context("link failed during setup")?;
            anyhow::bail!("peer closed the link before connecting");
        }
    };
    tracing::info!(channel_id = %bridge.channel_id(), "Connected");

    tokio::select! {
        _ = bridge.run() => Ok(()),
        linked = &mut link_task => {
            linked.context("link task panicked")?.context("link failed")?;
            Ok(())
        }
    }
}

fn demo_target() -> ObjectTarget {
    ObjectTarget::new()
        .method("echo", |args| Ok(Value::Array(args)))
        .method("add", |args| {
            let a: f64 = arg(&args, 0)?;
            let b: f64 = arg(&args, 1)?;
            Ok(json!(a + b))
        })
        .cancellable_method("sleep", |args, token| async move {
            let ms: u64 = arg(&args, 0)?;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(json!(ms)),
                _ = token.cancelled() => Err(EndpointError::new(format!("sleep({ms}) cancelled"))),
            }
        })
        .value("version", json!(env!("CARGO_PKG_VERSION")))
}
