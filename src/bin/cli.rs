//! EmberKV CLI
//!
//! Operates directly on a data directory through an embedded engine.

use clap::{Parser, Subcommand};
use emberkv::{Compactor, Config, Engine};

/// EmberKV CLI
#[derive(Parser, Debug)]
#[command(name = "emberkv-cli")]
#[command(about = "CLI for the EmberKV key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./emberkv_data")]
    data_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the store version
    Version,

    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Merge closed segments, dropping superseded records and tombstones
    Compact,
}

fn main() {
    let args = Args::parse();

    let config = Config::builder().data_dir(&args.data_dir).build();
    let engine = match Engine::open(config, emberkv::VERSION) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Failed to open database: {e}");
            std::process::exit(1);
        }
    };

    let result = run(&engine, &args.command);

    if let Err(e) = engine.close() {
        eprintln!("Failed to close database: {e}");
        std::process::exit(1);
    }
    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run(engine: &Engine, command: &Commands) -> emberkv::Result<()> {
    match command {
        Commands::Version => {
            println!("EmberKV version {}", engine.version());
        }

        Commands::Get { key } => {
            let record = engine.get(key.as_bytes())?;
            println!("{}", String::from_utf8_lossy(&record.value));
        }

        Commands::Set { key, value } => {
            engine.set(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }

        Commands::Del { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
        }

        Commands::Compact => {
            Compactor::new(engine).execute()?;
            println!("Compaction completed");
        }
    }
    Ok(())
}
