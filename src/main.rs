use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use trainlog::config::{default_config_path, load_config, print_schema};
use trainlog::identity::SignInCredential;
use trainlog::resources::ListParams;
use trainlog::session::AuthState;
use trainlog::startup::{connect, sign_in};
use trainlog::state::ClientState;
use trainlog::utils::init_logging;

#[derive(Parser)]
#[command(name = "trainlog")]
#[command(version)]
#[command(about = "Workout tracker client", long_about = None)]
struct Cli {
    /// Path to config file (defaults to $TRAINLOG_CONFIG or ./config.yaml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and persist the session for later commands
    SignIn {
        /// ID token from a Google sign-in flow
        #[arg(long, conflicts_with = "refresh_token", required_unless_present = "refresh_token")]
        google_id_token: Option<String>,
        /// Firebase refresh token from another device
        #[arg(long)]
        refresh_token: Option<String>,
    },
    /// Show the signed-in user
    Whoami,
    /// List the exercise catalogue
    Exercises,
    /// List training sessions, one page unless --all is given
    Sessions {
        /// Follow pagination to the end of the listing
        #[arg(long)]
        all: bool,
    },
    /// Show one training session with its workouts
    Session { id: String },
    /// Sign out and forget the persisted session
    SignOut,
    /// Print the JSON schema of the configuration file
    Schema,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    if let Commands::Schema = cli.command {
        print_schema()?;
        return Ok(());
    }

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = load_config(&config_path)?;
    init_logging(&config.logging)?;
    info!("Loaded configuration from {}", config_path.display());

    if let Commands::SignIn {
        google_id_token,
        refresh_token,
    } = &cli.command
    {
        let credential = match (google_id_token, refresh_token) {
            (Some(token), _) => SignInCredential::GoogleIdToken(token.clone()),
            (None, Some(token)) => SignInCredential::RefreshToken(token.clone()),
            (None, None) => return Err("a sign-in credential is required".into()),
        };
        return match sign_in(&config, &credential).await {
            Ok(user) => {
                println!("Signed in as {} ({})", user.label(), user.uid);
                Ok(())
            }
            Err(e) => {
                warn!("Sign-in failed: {}", e);
                Err(e.user_message().into())
            }
        };
    }

    let state = connect(Arc::new(config)).await?;
    let session = state.session.ready().await;
    if session.map(|s| s.auth_state()) != Some(AuthState::Authenticated) {
        error!("No signed-in user; configure an identity session first");
        state.shutdown().await;
        return Err("not signed in".into());
    }

    let result = execute_command(&cli.command, &state).await;
    state.shutdown().await;
    result
}

async fn execute_command(
    command: &Commands,
    state: &ClientState,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Whoami => {
            if let Some(user) = state.session.user() {
                println!("{} ({})", user.label(), user.uid);
            }
        }
        Commands::Exercises => {
            let list = state.exercises.list(ListParams::default()).await?;
            for exercise in &list.items {
                println!(
                    "{}\t{}\t{}",
                    exercise.id,
                    exercise.name,
                    exercise.body_part.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Sessions { all } => {
            let mut pages = state.training_sessions.infinite();
            while let Some(page) = pages.fetch_next_page().await? {
                for session in &page.items {
                    println!(
                        "{}\t{}\t{} workouts",
                        session.id,
                        session.started_at.to_rfc3339(),
                        session.workouts.len()
                    );
                }
                if !all {
                    break;
                }
            }
        }
        Commands::Session { id } => {
            let session = state.training_sessions.get_by_id(Some(id.as_str())).await?;
            println!("{} started {}", session.id, session.started_at.to_rfc3339());
            for (position, workout) in session.workouts.iter().enumerate() {
                let name = workout
                    .exercise_name
                    .as_deref()
                    .unwrap_or(workout.exercise_id.as_str());
                println!("{:>2}. {} ({} sets)", position + 1, name, workout.sets.len());
            }
        }
        Commands::SignOut => {
            state.sign_out().await?;
            println!("Signed out");
        }
        Commands::SignIn { .. } => return Err("sign-in does not run on a connected client".into()),
        Commands::Schema => print_schema()?,
    }
    Ok(())
}
