mod config;

use std::io::{self, BufRead as _, Write as _};

use clap::Parser;
use tgdh::{Error, GroupParams, MemoryBus, Session};
use tracing_subscriber::{fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};

use config::Config;

/// Drives a TGDH group: builds the initial tree, then applies join and leave
/// events from a script or an interactive prompt.
#[derive(Parser)]
struct Cli {
    /// Initial group size
    #[arg(short, long, value_name = "SIZE")]
    size: Option<u32>,

    /// Comma-separated events to run non-interactively,
    /// e.g. `join,join,leave:3,print`
    #[arg(long, value_name = "SCRIPT")]
    script: Option<String>,

    /// Use the tiny hand-checkable group instead of the 2048-bit MODP group
    #[arg(long)]
    toy: bool,

    /// Print the tree after every event
    #[arg(short, long)]
    render: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let (path, config) = Config::load()?;

    tracing::debug!("config loaded from `{}`", path.display());

    let size = cli.size.unwrap_or(config.size);
    let render = cli.render || config.render;

    let mut builder = Session::builder(size);

    if cli.toy {
        builder = builder.with_params(GroupParams::toy());
    }

    let mut session = builder.start()?;

    if render {
        print_group(&session)?;
    }

    let alive = match &cli.script {
        Some(script) => run_script(&mut session, script, render)?,
        None => repl(&mut session, render)?,
    };

    if alive {
        tracing::info!("shutting down");
    }

    session.close();

    Ok(())
}

fn run_script(session: &mut Session<MemoryBus>, script: &str, render: bool) -> anyhow::Result<bool> {
    for event in script.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        if !dispatch(session, event, render)? {
            return Ok(false);
        }
    }

    Ok(true)
}

fn repl(session: &mut Session<MemoryBus>, render: bool) -> anyhow::Result<bool> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("tgdh> ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            return Ok(true);
        };

        let line = line?;
        let event = line.trim();

        if event.is_empty() {
            continue;
        }

        if !dispatch(session, event, render)? {
            return Ok(false);
        }
    }
}

/// Applies one event; returns `false` when the session should end.
fn dispatch(session: &mut Session<MemoryBus>, event: &str, render: bool) -> anyhow::Result<bool> {
    match event {
        "join" => {
            let joined = session.join()?;

            println!("member {joined} joined the group");
        }

        "print" => {
            print_group(session)?;

            return Ok(true);
        }

        "quit" | "exit" => return Ok(false),

        other => {
            let Some(mid) = other
                .strip_prefix("leave")
                .map(|rest| rest.trim_start_matches([':', ' ']))
                .and_then(|rest| rest.parse().ok())
            else {
                println!("unknown event `{other}`; try `join`, `leave:<id>`, `print`, `quit`");

                return Ok(true);
            };

            match session.leave(mid) {
                Ok(()) => println!("member {mid} left the group"),

                Err(e) if e.downcast_ref::<Error>() == Some(&Error::GroupEmpty) => {
                    println!("the group is down to a single member; terminating");

                    return Ok(false);
                }

                Err(e) if matches!(e.downcast_ref::<Error>(), Some(Error::NotFound(_))) => {
                    println!("member {mid} is not part of the group");

                    return Ok(true);
                }

                Err(e) => return Err(e),
            }
        }
    }

    if render {
        print_group(session)?;
    }

    Ok(true)
}

fn print_group(session: &Session<MemoryBus>) -> anyhow::Result<()> {
    let members = session.member_ids();

    println!("members: {members:?}");

    if let Some(first) = members.first() {
        print!("{}", session.render(*first)?);
    }

    Ok(())
}
