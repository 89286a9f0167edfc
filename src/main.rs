//! orbita CLI entry point

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use orbita::{
    app::App,
    commands::{
        cmd_analyze, cmd_campaign, cmd_check, cmd_company, cmd_init, cmd_lead_create,
        cmd_lead_update, cmd_login, cmd_logout, cmd_meeting_status, cmd_prefs, cmd_quote_status,
        cmd_send, cmd_show, cmd_status, cmd_watch, cmd_webhooks, print_analysis, print_campaign,
        print_check, print_init, print_lead, print_login, print_page, print_prefs, print_send,
        print_status, print_watch, read_password, CampaignAction, CampaignOptions, CompanyEdit,
        InitOptions, LeadChange, ShowOptions,
    },
    config::Config,
    error::Result,
    gateway::{CampaignAudience, WebhookTarget},
    models::{
        CampaignChannel, FunnelStage, LeadSource, LeadStatus, MeetingStatus, MeetingType, NewLead,
        Priority, QuoteStatus,
    },
    notify::ConsoleNotifier,
    progress::LogWriterFactory,
    shell::Route,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "orbita")]
#[command(version, about = "Realtime sync core and operator CLI for the ORBITA dashboard", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize orbita configuration and local storage
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Check that the backend credentials are set
    Check,

    /// Show backend, realtime and session status
    Status,

    /// Log in to the dashboard backend
    Login {
        email: String,

        /// Password (prompted for when omitted)
        #[arg(long, env = "ORBITA_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Forget the stored session
    Logout,

    /// Render one page of the dashboard
    Show {
        /// Page to show (dashboard, leads, conversations, telegram, quotes,
        /// meetings, campaigns, agents, analytics, settings)
        #[arg(default_value = "dashboard")]
        page: Route,

        /// Text search on the page's list
        #[arg(short, long)]
        search: Option<String>,

        /// Lead funnel stage filter
        #[arg(long)]
        stage: Option<FunnelStage>,

        /// Lead status filter
        #[arg(long)]
        status: Option<LeadStatus>,

        /// Lead priority filter
        #[arg(long)]
        priority: Option<Priority>,

        /// Quote status filter
        #[arg(long)]
        quote_status: Option<QuoteStatus>,

        /// Meeting status filter
        #[arg(long)]
        meeting_status: Option<MeetingStatus>,

        /// Meeting type filter
        #[arg(long)]
        meeting_type: Option<MeetingType>,
    },

    /// Keep a page open and print its live changes
    Watch {
        #[arg(default_value = "dashboard")]
        page: Route,

        /// Stop after this many changes
        #[arg(long)]
        max_changes: Option<usize>,
    },

    /// Create or update leads
    Lead {
        #[command(subcommand)]
        action: LeadAction,
    },

    /// Send a message for a lead
    Send {
        lead_id: String,
        message: String,

        /// Send straight to the lead's bot chat instead of the agent
        #[arg(long)]
        channel: bool,
    },

    /// Compose a campaign and preview, save or send it
    Campaign {
        message: String,

        #[arg(short, long, default_value = "")]
        name: String,

        #[arg(long, default_value = "telegram")]
        channel: CampaignChannel,

        /// Only leads in this status
        #[arg(long)]
        status: Option<LeadStatus>,

        /// Only leads in this funnel stage
        #[arg(long)]
        stage: Option<FunnelStage>,

        #[arg(long, value_enum, default_value = "preview")]
        action: CampaignActionArg,
    },

    /// Change a quote's status
    Quote { quote_id: String, status: QuoteStatus },

    /// Change a meeting's status
    Meeting {
        meeting_id: String,
        status: MeetingStatus,
    },

    /// Point the bot webhooks at the backend
    Webhooks {
        /// both, leads or admin
        #[arg(default_value = "both")]
        target: WebhookTarget,
    },

    /// Show or toggle notification preferences
    Prefs {
        /// Preference key to flip
        #[arg(long)]
        toggle: Option<String>,
    },

    /// Edit the company profile
    Company {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        sector: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        website: Option<String>,
    },

    /// Run the analytics agent
    Analyze,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum LeadAction {
    /// Enter a lead by hand
    Create {
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        job_title: Option<String>,
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        budget: Option<String>,
        #[arg(long, default_value = "media")]
        priority: Priority,
        #[arg(long, default_value = "manual")]
        source: LeadSource,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Move a lead to another funnel stage
    Stage { lead_id: String, stage: FunnelStage },

    /// Change a lead's status
    Status { lead_id: String, status: LeadStatus },

    /// Change a lead's priority
    Priority { lead_id: String, priority: Priority },
}

#[derive(Clone, Copy, ValueEnum)]
enum CampaignActionArg {
    Preview,
    Draft,
    Send,
}

impl From<CampaignActionArg> for CampaignAction {
    fn from(arg: CampaignActionArg) -> Self {
        match arg {
            CampaignActionArg::Preview => CampaignAction::Preview,
            CampaignActionArg::Draft => CampaignAction::Draft,
            CampaignActionArg::Send => CampaignAction::Send,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn emit<T: Serialize>(json: bool, value: &T, print: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

/// Exit non-zero when a store reported the failure already
fn fail_if(failed: bool) {
    if failed {
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory))
        .with(filter)
        .init();

    // Handle init command specially (doesn't need existing config)
    if matches!(cli.command, Commands::Init { .. }) {
        return handle_init(cli).await;
    }

    // Commands that need no config or backend
    match &cli.command {
        Commands::Check => {
            let report = cmd_check();
            emit(cli.json, &report, print_check)?;
            fail_if(!report.is_complete());
            return Ok(());
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "orbita", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(cli.config.as_deref()).await?;
    let mut app = App::connect(config, Arc::new(ConsoleNotifier)).await?;
    let json = cli.json;

    match cli.command {
        Commands::Init { .. } | Commands::Check | Commands::Completions { .. } => unreachable!(),

        Commands::Status => {
            let status = cmd_status(&mut app).await?;
            emit(json, &status, print_status)?;
        }

        Commands::Login { email, password } => {
            let password = match password {
                Some(password) => password,
                None => read_password("Password: ")?,
            };
            let report = cmd_login(&app, &email, &password).await?;
            emit(json, &report, print_login)?;
            fail_if(!report.is_authenticated());
        }

        Commands::Logout => {
            cmd_logout(&mut app).await?;
            if !json {
                println!("✓ Logged out");
            }
        }

        Commands::Show {
            page,
            search,
            stage,
            status,
            priority,
            quote_status,
            meeting_status,
            meeting_type,
        } => {
            let options = ShowOptions {
                search,
                lead_stage: stage,
                lead_status: status,
                lead_priority: priority,
                quote_status,
                meeting_status,
                meeting_kind: meeting_type,
            };
            let snapshot = cmd_show(&app, page, &options).await?;
            emit(json, &snapshot, print_page)?;
        }

        Commands::Watch { page, max_changes } => {
            let summary = cmd_watch(&mut app, page, max_changes).await?;
            emit(json, &summary, print_watch)?;
        }

        Commands::Lead { action } => {
            let lead = match action {
                LeadAction::Create {
                    name,
                    email,
                    phone,
                    company,
                    job_title,
                    service,
                    budget,
                    priority,
                    source,
                    notes,
                } => {
                    let lead = NewLead {
                        email,
                        phone,
                        company,
                        job_title,
                        service_interest: service,
                        estimated_budget: budget,
                        priority,
                        source,
                        notes,
                        ..NewLead::new(name)
                    };
                    cmd_lead_create(&app, lead).await?
                }
                LeadAction::Stage { lead_id, stage } => {
                    cmd_lead_update(&app, &lead_id, LeadChange::Stage(stage)).await?
                }
                LeadAction::Status { lead_id, status } => {
                    cmd_lead_update(&app, &lead_id, LeadChange::Status(status)).await?
                }
                LeadAction::Priority { lead_id, priority } => {
                    cmd_lead_update(&app, &lead_id, LeadChange::Priority(priority)).await?
                }
            };
            match lead {
                Some(lead) => emit(json, &lead, print_lead)?,
                None => fail_if(true),
            }
        }

        Commands::Send {
            lead_id,
            message,
            channel,
        } => {
            let report = cmd_send(&app, &lead_id, &message, channel).await?;
            emit(json, &report, print_send)?;
            fail_if(!report.delivered);
        }

        Commands::Campaign {
            message,
            name,
            channel,
            status,
            stage,
            action,
        } => {
            let action = CampaignAction::from(action);
            let options = CampaignOptions {
                name,
                channel,
                message,
                audience: CampaignAudience { status, stage },
                action,
            };
            let report = cmd_campaign(&app, options).await?;
            emit(json, &report, print_campaign)?;
            let failed = match action {
                CampaignAction::Preview => false,
                CampaignAction::Draft => report.draft.is_none(),
                CampaignAction::Send => !report.sent,
            };
            fail_if(failed);
        }

        Commands::Quote { quote_id, status } => {
            fail_if(!cmd_quote_status(&app, &quote_id, status).await?);
        }

        Commands::Meeting { meeting_id, status } => {
            fail_if(!cmd_meeting_status(&app, &meeting_id, status).await?);
        }

        Commands::Webhooks { target } => match cmd_webhooks(&app, target).await? {
            Some(ack) if json => println!("{}", serde_json::to_string_pretty(&ack)?),
            Some(_) => {}
            None => fail_if(true),
        },

        Commands::Prefs { toggle } => match cmd_prefs(&app, toggle.as_deref()).await? {
            Some(prefs) => emit(json, &prefs, print_prefs)?,
            None => fail_if(true),
        },

        Commands::Company {
            name,
            sector,
            description,
            phone,
            email,
            website,
        } => {
            let edit = CompanyEdit {
                name,
                sector,
                description,
                phone,
                email,
                website,
            };
            match cmd_company(&app, edit).await? {
                Some(company) if json => println!("{}", serde_json::to_string_pretty(&company)?),
                Some(_) => {}
                None => fail_if(true),
            }
        }

        Commands::Analyze => match cmd_analyze(&app).await? {
            Some(report) => emit(json, &report, print_analysis)?,
            None => fail_if(true),
        },
    }

    Ok(())
}

async fn handle_init(cli: Cli) -> Result<()> {
    let Commands::Init { force } = cli.command else {
        unreachable!()
    };

    // A --config path names either the file or the directory holding it
    let (base_dir, config_path) = if let Some(path) = cli.config {
        if path.extension().is_some_and(|e| e == "toml") {
            let base = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir);
            (base, path)
        } else {
            (path.clone(), path.join("config.toml"))
        }
    } else {
        let base = Config::default_base_dir();
        (base.clone(), base.join("config.toml"))
    };

    let report = cmd_init(InitOptions {
        base_dir,
        config_path,
        force,
    })
    .await?;
    emit(cli.json, &report, print_init)
}

async fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        eprintln!(
            "Config file not found: {}\nRun 'orbita init' first.",
            config_path.display()
        );
        std::process::exit(1);
    }

    Config::load(&config_path)
}
