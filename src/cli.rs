use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, NaiveTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use job_tracker::api::{self, ApiState};
use job_tracker::applications::{Application, ApplicationFilter, ApplicationStatus};
use job_tracker::classifier::Classifier;
use job_tracker::config::TrackerConfig;
use job_tracker::followup::{self, FollowUpPolicy, FollowUpScheduler, MarkSentOutcome};
use job_tracker::mail::{DisabledMailer, ImapInbox, Inbox, Mailer, SmtpMailer};
use job_tracker::responses::ResponseTracker;
use job_tracker::store::{ApplicationStore, LibSqlBackend};

#[derive(Parser, Debug)]
#[command(
    name = "job-tracker",
    about = "Track job applications, classify employer replies and send follow-ups",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service and background scheduler (default command)
    Serve(ServeArgs),
    /// Follow-up policy and dispatch
    Followups {
        #[command(subcommand)]
        command: FollowupsCommand,
    },
    /// Manage tracked applications
    Applications {
        #[command(subcommand)]
        command: ApplicationsCommand,
    },
    /// Classify and ingest employer email
    Emails {
        #[command(subcommand)]
        command: EmailsCommand,
    },
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured HTTP port
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum FollowupsCommand {
    /// Run one policy pass
    Run {
        /// Report what would be queued without writing anything
        #[arg(long)]
        dry_run: bool,
        /// Send due follow-ups after the pass
        #[arg(long, conflicts_with = "dry_run")]
        dispatch: bool,
    },
    /// Record a follow-up that was sent by hand
    MarkSent { id: Uuid },
}

#[derive(Subcommand, Debug)]
enum ApplicationsCommand {
    /// Start tracking an application
    Add {
        #[arg(long)]
        company: String,
        #[arg(long)]
        position: String,
        /// Recruiter or hiring-manager address
        #[arg(long)]
        contact: Option<String>,
        /// Date applied (YYYY-MM-DD), defaults to today
        #[arg(long)]
        applied: Option<NaiveDate>,
        #[arg(long)]
        status: Option<ApplicationStatus>,
    },
    /// List tracked applications
    List {
        #[arg(long)]
        status: Option<ApplicationStatus>,
    },
}

#[derive(Subcommand, Debug)]
enum EmailsCommand {
    /// Classify a single email without recording it
    Classify {
        #[arg(long, default_value = "")]
        subject: String,
        #[arg(long, default_value = "")]
        body: String,
    },
    /// Fetch unseen mail and record employer responses
    Sync,
}

/// Collaborators shared by every command.
struct Services {
    config: TrackerConfig,
    store: Arc<dyn ApplicationStore>,
    scheduler: Arc<FollowUpScheduler>,
    tracker: Arc<ResponseTracker>,
    inbox: Option<Arc<dyn Inbox>>,
}

impl Services {
    async fn build(config: TrackerConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn ApplicationStore> = Arc::new(
            LibSqlBackend::new_local(&config.db_path)
                .await
                .with_context(|| format!("opening database at {}", config.db_path.display()))?,
        );

        let mailer: Arc<dyn Mailer> = match &config.email {
            Some(email) => Arc::new(SmtpMailer::new(email.clone())),
            None => Arc::new(DisabledMailer),
        };
        let inbox: Option<Arc<dyn Inbox>> = match &config.email {
            Some(email) => Some(Arc::new(ImapInbox::new(email.clone()))),
            None => None,
        };

        let tracker = Arc::new(ResponseTracker::new(store.clone(), Classifier::new()));
        let mut scheduler = FollowUpScheduler::new(
            store.clone(),
            mailer,
            FollowUpPolicy::new(config.follow_up.clone()),
        );
        if config.scheduler.sync_inbox
            && let Some(inbox) = &inbox
        {
            scheduler = scheduler.with_inbox_sync(tracker.clone(), inbox.clone());
        }

        Ok(Self {
            config,
            store,
            scheduler: Arc::new(scheduler),
            tracker,
            inbox,
        })
    }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) async fn run(config: TrackerConfig) -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    let services = Services::build(config).await?;
    match command {
        Command::Serve(args) => serve(services, args).await,
        Command::Followups { command } => run_followups(&services, command).await,
        Command::Applications { command } => run_applications(&services, command).await,
        Command::Emails { command } => run_emails(&services, command).await,
    }
}

async fn serve(services: Services, args: ServeArgs) -> anyhow::Result<()> {
    let port = args.port.unwrap_or(services.config.http_port);

    let ticker = if services.config.scheduler.enabled {
        Some(followup::spawn_scheduler(
            services.scheduler.clone(),
            &services.config.scheduler.schedule,
        )?)
    } else {
        info!("Background scheduler disabled");
        None
    };

    let app = api::routes(ApiState {
        store: services.store.clone(),
        scheduler: services.scheduler.clone(),
        tracker: services.tracker.clone(),
        classifier: Classifier::new(),
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding HTTP port {port}"))?;
    info!(port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    if let Some(ticker) = ticker {
        ticker.abort();
    }
    info!("Shut down");
    Ok(())
}

async fn run_followups(services: &Services, command: FollowupsCommand) -> anyhow::Result<()> {
    let now = Utc::now();
    match command {
        FollowupsCommand::Run { dry_run, dispatch } => {
            let pass = services.scheduler.run_policy_pass(now, dry_run).await?;
            if dry_run {
                for flagged in &pass.flagged {
                    eprintln!(
                        "would queue {} ({} at {}): {}",
                        flagged.application_id, flagged.position, flagged.company, flagged.reason
                    );
                }
            }
            print_json(&pass)?;
            if dispatch {
                print_json(&services.scheduler.dispatch_due(now).await?)?;
            }
            Ok(())
        }
        FollowupsCommand::MarkSent { id } => match services.scheduler.mark_sent(id, now).await? {
            MarkSentOutcome::Sent(app) => print_json(&app),
            MarkSentOutcome::NotEligible(reason) => {
                anyhow::bail!("cannot mark {id} as sent: {reason}")
            }
        },
    }
}

async fn run_applications(
    services: &Services,
    command: ApplicationsCommand,
) -> anyhow::Result<()> {
    match command {
        ApplicationsCommand::Add {
            company,
            position,
            contact,
            applied,
            status,
        } => {
            let applied_date = applied
                .map(|date| date.and_time(NaiveTime::MIN).and_utc())
                .unwrap_or_else(Utc::now);
            let mut app = Application::new(company, position, applied_date);
            app.contact_email = contact;
            if let Some(status) = status {
                app.status = status;
            }
            services.store.insert_application(&app).await?;
            print_json(&app)
        }
        ApplicationsCommand::List { status } => {
            let filter = ApplicationFilter {
                statuses: status.into_iter().collect(),
                ..ApplicationFilter::default()
            };
            print_json(&services.store.list_applications(&filter).await?)
        }
    }
}

async fn run_emails(services: &Services, command: EmailsCommand) -> anyhow::Result<()> {
    match command {
        EmailsCommand::Classify { subject, body } => {
            print_json(&Classifier::new().classify(&subject, &body))
        }
        EmailsCommand::Sync => {
            let inbox = services
                .inbox
                .as_ref()
                .context("mail is not configured (set EMAIL_IMAP_HOST)")?;
            let report = services.tracker.sync(inbox.as_ref(), Utc::now()).await?;
            print_json(&report)
        }
    }
}
