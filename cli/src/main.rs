//! Veritas CLI — command-line interface for a local Veritas ledger.
//!
//! Stands in for the transport layer: each subcommand builds one transaction
//! and commits it through the node, or inspects the stored chain.

mod keys;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::{Parser, Subcommand};
use rand::RngCore;
use tracing::info;
use tracing_subscriber::EnvFilter;
use veritas_chain::analyzer::AdmissionGate;
use veritas_chain::config::NodeConfig;
use veritas_chain::economy;
use veritas_chain::scheduler::ExpiryScheduler;
use veritas_chain::store::MemoryStore;
use veritas_chain::types::{current_timestamp, ContentId};
use veritas_chain::{Node, Result, Transaction, VoteChoice};

#[derive(Parser)]
#[command(name = "veritas")]
#[command(about = "Veritas CLI — authenticity-voting ledger")]
#[command(version)]
struct Cli {
    /// JSON node configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the configured data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and genesis block if missing
    Init,
    /// Register a user, issuing an Ed25519 key pair
    Register { user: String },
    /// Post an image file (costs credits, must pass the admission gate)
    Post { user: String, file: PathBuf },
    /// Vote on a post: believe or fake
    Vote {
        user: String,
        content: String,
        choice: VoteChoice,
    },
    Follow { user: String, target: String },
    Unfollow { user: String, target: String },
    Save { user: String, content: String },
    Repost { user: String, content: String },
    Unrepost { user: String, content: String },
    /// Set profile: JSON with bio/avatar, or plain text for the bio
    Profile { user: String, text: String },
    Comment {
        user: String,
        content: String,
        text: String,
    },
    /// Send a private message
    Message { user: String, to: String, text: String },
    /// Settle a post immediately
    Resolve { content: String },
    /// Print the full ledger snapshot as JSON
    Show,
    /// Print counts and credit totals
    Summary,
    /// Replay the chain from genesis and check integrity
    Verify,
    /// Run the expiry scheduler
    Watch {
        /// Run a single sweep and exit
        #[arg(long)]
        once: bool,
    },
    /// Walk through both settlement outcomes on an in-memory ledger
    Demo,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    if matches!(cli.command, Commands::Demo) {
        return cmd_demo();
    }

    let config = load_config(&cli)?;
    let node = Node::open(&config)?;

    let tx = match cli.command {
        Commands::Init => {
            println!("Ledger ready in {}", config.data_dir.display());
            print_summary(&node)?;
            return Ok(());
        }
        Commands::Register { user } => {
            let (keypair, fresh) = keys::issue(&config.data_dir, &user)?;
            if fresh {
                println!("Issued key pair for {user}");
                println!("  secret: {}", hex::encode(keypair.signing_key.to_bytes()));
            }
            Transaction::RegisterUser {
                sender: user,
                public_key: keypair.public_bytes(),
            }
        }
        Commands::Post { user, file } => Transaction::PostImage {
            sender: user,
            image: std::fs::read(&file)?,
        },
        Commands::Vote {
            user,
            content,
            choice,
        } => Transaction::Vote {
            sender: user,
            target: ContentId(content),
            choice,
        },
        Commands::Follow { user, target } => Transaction::Follow {
            sender: user,
            target_user: target,
        },
        Commands::Unfollow { user, target } => Transaction::Unfollow {
            sender: user,
            target_user: target,
        },
        Commands::Save { user, content } => Transaction::SavePost {
            sender: user,
            target: ContentId(content),
        },
        Commands::Repost { user, content } => Transaction::Repost {
            sender: user,
            target: ContentId(content),
        },
        Commands::Unrepost { user, content } => Transaction::Unrepost {
            sender: user,
            target: ContentId(content),
        },
        Commands::Profile { user, text } => Transaction::SetProfile {
            sender: user,
            content: text,
        },
        Commands::Comment {
            user,
            content,
            text,
        } => Transaction::Comment {
            sender: user,
            target: ContentId(content),
            content: text,
        },
        Commands::Message { user, to, text } => Transaction::PrivateMessage {
            sender: user,
            target_user: to,
            content: text,
        },
        Commands::Resolve { content } => Transaction::resolve(ContentId(content)),
        Commands::Show => {
            let snapshot = node.snapshot()?;
            println!("{}", serde_json::to_string_pretty(&*snapshot)?);
            return Ok(());
        }
        Commands::Summary => return print_summary(&node),
        Commands::Verify => {
            node.verify()?;
            println!("Chain OK: {} blocks verified", node.height()? + 1);
            return Ok(());
        }
        Commands::Watch { once } => return cmd_watch(node, &config, once),
        Commands::Demo => unreachable!("handled above"),
    };

    let action = tx.action_kind();
    let hash = node.commit(tx)?;
    println!("{action} committed: {hash}");
    Ok(())
}

fn cmd_watch(node: Node, config: &NodeConfig, once: bool) -> Result<()> {
    let scheduler = ExpiryScheduler::from_config(&config.scheduler);
    if once {
        let settled = scheduler.sweep(&node, current_timestamp())?;
        println!("Settled {} expired post(s)", settled.len());
        return Ok(());
    }

    info!(
        data_dir = %config.data_dir.display(),
        poll_secs = config.scheduler.poll_interval_secs,
        window_secs = config.scheduler.voting_window_secs,
        "watching for expired posts"
    );
    let _handle = scheduler.spawn(Arc::new(node));
    loop {
        thread::park();
    }
}

fn cmd_demo() -> Result<()> {
    println!("=== Veritas — Settlement Demo ===\n");

    let node = Node::with_store(Arc::new(MemoryStore::new()), AdmissionGate::default(), 64)?;
    for name in ["alice", "bob", "carol"] {
        let keypair = keys::Keypair::generate();
        node.commit(Transaction::RegisterUser {
            sender: name.into(),
            public_key: keypair.public_bytes(),
        })?;
    }
    println!(
        "Registered alice, bob, carol with {} credits each.\n",
        economy::INITIAL_CREDITS
    );

    // A flat payload never passes the gate.
    let flat = vec![128u8; 4096];
    if let Err(e) = node.commit(Transaction::PostImage {
        sender: "alice".into(),
        image: flat,
    }) {
        println!("[Gate] Flat image refused: {e}\n");
    }

    println!("[Round 1] alice posts, bob believes it");
    let real = post_photo(&node, "alice")?;
    node.commit(Transaction::Vote {
        sender: "bob".into(),
        target: real.clone(),
        choice: VoteChoice::Believe,
    })?;
    print_balances(&node)?;
    node.commit(Transaction::resolve(real.clone()))?;
    println!("  Settled: {}", node.snapshot()?.content[&real].verdict);
    print_balances(&node)?;

    println!("\n[Round 2] alice posts, carol calls it fake");
    let fake = post_photo(&node, "alice")?;
    node.commit(Transaction::Vote {
        sender: "carol".into(),
        target: fake.clone(),
        choice: VoteChoice::Fake,
    })?;
    node.commit(Transaction::resolve(fake.clone()))?;
    println!("  Settled: {}", node.snapshot()?.content[&fake].verdict);
    print_balances(&node)?;

    println!("\n[Round 3] settling round 1 again changes nothing");
    node.commit(Transaction::resolve(real))?;
    print_balances(&node)?;

    node.verify()?;
    println!("\n=== Chain Summary ===");
    print_summary(&node)
}

/// Random bytes stand in for a compressed photo: high entropy, mid spread.
fn post_photo(node: &Node, user: &str) -> Result<ContentId> {
    let mut image = vec![0u8; 8192];
    rand::thread_rng().fill_bytes(&mut image);
    let hash = node.commit(Transaction::PostImage {
        sender: user.into(),
        image,
    })?;
    Ok(ContentId(hash))
}

fn print_balances(node: &Node) -> Result<()> {
    let snapshot = node.snapshot()?;
    let line: Vec<String> = snapshot
        .users
        .values()
        .map(|u| format!("{}={}", u.username, u.balance))
        .collect();
    println!("  Balances: {}", line.join(", "));
    Ok(())
}

/// Print a summary of the ledger state.
fn print_summary(node: &Node) -> Result<()> {
    let summary = node.summary()?;
    println!("  Block height:     {}", node.height()?);
    println!("  Users:            {}", summary.total_users);
    println!("  Posts:            {}", summary.total_content);
    println!("  Voting open:      {}", summary.open_content);
    println!("  Confirmed real:   {}", summary.confirmed_real);
    println!("  Banned fake:      {}", summary.banned_fake);
    println!("  Credits held:     {}", summary.circulating_credits);
    println!("  Credits staked:   {}", summary.staked_credits);
    Ok(())
}
