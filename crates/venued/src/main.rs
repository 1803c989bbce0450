//! venued - venue reservation and session ledger
//!
//! Wires together:
//! - Configuration loading and machine inventory sync
//! - Store initialization
//! - Reservation coordinator and session ledger
//!
//! Each invocation runs one staff command against the shared database.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Local};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use venue_api::{
    Booking, BookingDetails, ConflictResult, EventStatus, MaintenancePriority, PlatformCategory,
};
use venue_config::{load_config, VenueConfig};
use venue_core::{BookingAmendment, BookingRequest, VenueCore};
use venue_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use venue_util::{
    default_config_path, format_datetime_full, format_hours_minutes, parse_local_datetime,
    BookingId, ClientId, MachineId, SessionId, StaffId, TimeWindow, DATABASE_FILENAME,
};

/// venued - Station reservations and client time balances
#[derive(Parser, Debug)]
#[command(name = "venued", version)]
#[command(about = "Station reservations and client time balances", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/venue/config.toml)
    #[arg(short, long, global = true, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set VENUE_DATA_DIR env var)
    #[arg(short, long, global = true, env = "VENUE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, global = true, default_value = "warn")]
    log_level: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List machines and what occupies them right now
    Machines,

    /// Reserve machines for an event or a maintenance window
    Book {
        #[arg(value_enum)]
        kind: KindArg,

        /// Start time (YYYY-MM-DD HH:MM)
        #[arg(long)]
        start: String,

        /// End time (YYYY-MM-DD HH:MM); omit for an open-ended window
        #[arg(long)]
        end: Option<String>,

        /// Target machine; repeat for several
        #[arg(short, long = "machine", required = true)]
        machines: Vec<String>,

        /// Staff member creating the booking
        #[arg(long, env = "VENUE_STAFF")]
        staff: String,

        /// Event name
        #[arg(long)]
        name: Option<String>,

        /// Client the event is for
        #[arg(long)]
        customer: Option<String>,

        /// Maintenance category (cleaning, repair, upgrade, ...)
        #[arg(long, default_value = "general")]
        category: String,

        #[arg(long, default_value = "normal")]
        priority: String,
    },

    /// Change an existing booking
    Amend {
        id: String,

        #[arg(long)]
        start: Option<String>,

        #[arg(long, conflicts_with = "open_ended")]
        end: Option<String>,

        /// Remove the end time
        #[arg(long)]
        open_ended: bool,

        /// Replacement machine set; repeat for several
        #[arg(short, long = "machine")]
        machines: Vec<String>,

        /// New event status
        #[arg(long)]
        status: Option<String>,
    },

    /// Delete a booking
    Cancel { id: String },

    /// Show one booking
    Show { id: String },

    /// List bookings, for one machine or for a time range
    Schedule {
        #[arg(short, long)]
        machine: Option<String>,

        /// Range start (default: now)
        #[arg(long)]
        from: Option<String>,

        /// Range end (default: 24 hours after start)
        #[arg(long)]
        to: Option<String>,
    },

    /// Check whether a machine is free for a window
    Check {
        machine: String,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: Option<String>,
    },

    /// Start a client session on a machine
    OpenSession {
        #[arg(long)]
        client: String,

        #[arg(long)]
        machine: String,
    },

    /// End a session and charge its minutes
    CloseSession {
        session_id: String,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Add minutes to a client's balance
    Credit {
        #[arg(long)]
        client: String,

        /// general, console or specialized
        #[arg(long)]
        category: String,

        #[arg(long)]
        minutes: i64,
    },

    /// Show a client's balance
    Balance {
        #[arg(long)]
        client: String,
    },

    /// Show recent audit events
    Audit {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Event,
    Maintenance,
}

/// Loaded configuration plus the core wired to its store
struct Service {
    config: VenueConfig,
    store: Arc<dyn Store>,
    core: VenueCore,
    json: bool,
}

impl Service {
    fn new(args: &Args) -> Result<Self> {
        let mut config = if args.config.exists() {
            load_config(&args.config)
                .with_context(|| format!("Failed to load config from {:?}", args.config))?
        } else {
            warn!(config_path = %args.config.display(), "Config file not found, using defaults");
            VenueConfig::default()
        };

        if let Some(data_dir) = &args.data_dir {
            config.service.database_path = data_dir.join(DATABASE_FILENAME);
            config.service.data_dir = data_dir.clone();
        }

        if let Some(parent) = config.service.database_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {:?}", parent))?;
        }

        let store = SqliteStore::open(&config.service.database_path).with_context(|| {
            format!("Failed to open database {:?}", config.service.database_path)
        })?;
        store.set_busy_timeout(config.service.busy_timeout)?;
        let store: Arc<dyn Store> = Arc::new(store);

        info!(
            config_path = %args.config.display(),
            database = %config.service.database_path.display(),
            machine_count = config.machines.len(),
            "Configuration loaded"
        );

        VenueCore::sync_machines(&config, store.as_ref())?;
        let core = VenueCore::new(&config, store.clone());

        Ok(Self {
            config,
            store,
            core,
            json: args.json,
        })
    }

    async fn run(&self, command: Command) -> Result<()> {
        let now = venue_util::now();

        match command {
            Command::Machines => self.machines(now),
            Command::Book {
                kind,
                start,
                end,
                machines,
                staff,
                name,
                customer,
                category,
                priority,
            } => {
                let details = match kind {
                    KindArg::Event => BookingDetails::Event {
                        name: name.ok_or_else(|| anyhow!("--name is required for events"))?,
                        status: EventStatus::default(),
                        customer: customer.map(ClientId::new),
                    },
                    KindArg::Maintenance => BookingDetails::Maintenance {
                        category,
                        priority: priority.parse::<MaintenancePriority>()?,
                    },
                };
                let request = BookingRequest {
                    details,
                    window: parse_window(&start, end.as_deref())?,
                    machine_ids: machines.into_iter().map(MachineId::new).collect(),
                    created_by: StaffId::new(staff),
                };

                let id = self.core.coordinator.create_booking(request).await?;
                let booking = self.core.coordinator.get_booking(&id)?;
                self.print_booking(&booking)
            }
            Command::Amend {
                id,
                start,
                end,
                open_ended,
                machines,
                status,
            } => {
                let id = parse_booking_id(&id)?;
                let current = self.core.coordinator.get_booking(&id)?;

                let mut amendment = BookingAmendment::default();
                if start.is_some() || end.is_some() || open_ended {
                    let start = match start {
                        Some(s) => parse_time(&s)?,
                        None => current.window.start,
                    };
                    let end = match (end, open_ended) {
                        (_, true) => None,
                        (Some(e), false) => Some(parse_time(&e)?),
                        (None, false) => current.window.end,
                    };
                    amendment.window = Some(TimeWindow::new(start, end)?);
                }
                if !machines.is_empty() {
                    amendment.machine_ids = Some(machines.into_iter().map(MachineId::new).collect());
                }
                if let Some(status) = status {
                    let BookingDetails::Event { name, customer, .. } = current.details else {
                        bail!("--status only applies to events");
                    };
                    amendment.details = Some(BookingDetails::Event {
                        name,
                        status: status.parse::<EventStatus>()?,
                        customer,
                    });
                }

                let booking = self.core.coordinator.update_booking(&id, amendment).await?;
                self.print_booking(&booking)
            }
            Command::Cancel { id } => {
                let id = parse_booking_id(&id)?;
                self.core.coordinator.delete_booking(&id).await?;
                println!("Cancelled booking {}", id);
                Ok(())
            }
            Command::Show { id } => {
                let booking = self.core.coordinator.get_booking(&parse_booking_id(&id)?)?;
                self.print_booking(&booking)
            }
            Command::Schedule { machine, from, to } => {
                let bookings = match machine {
                    Some(machine) => self
                        .core
                        .coordinator
                        .bookings_for_machine(&MachineId::new(machine))?,
                    None => {
                        let start = match from {
                            Some(s) => parse_time(&s)?,
                            None => now,
                        };
                        let end = match to {
                            Some(s) => parse_time(&s)?,
                            None => start + ChronoDuration::hours(24),
                        };
                        self.core
                            .coordinator
                            .bookings_in_window(&TimeWindow::new(start, Some(end))?)?
                    }
                };
                self.print_bookings(&bookings)
            }
            Command::Check {
                machine,
                start,
                end,
            } => {
                let window = parse_window(&start, end.as_deref())?;
                let result = self
                    .core
                    .coordinator
                    .check_availability(&MachineId::new(machine.as_str()), &window)?;
                match result {
                    ConflictResult::NoConflict => println!("{} is free for {}", machine, window),
                    ConflictResult::Conflict(info) => println!("{}", info),
                }
                Ok(())
            }
            Command::OpenSession { client, machine } => {
                let opened = self
                    .core
                    .ledger
                    .open_session(&ClientId::new(client), &MachineId::new(machine), now)
                    .await?;
                self.print(&opened, || {
                    format!(
                        "Session {} started at {}\nToken: {}",
                        opened.session_id,
                        format_datetime_full(&opened.started_at),
                        opened.token
                    )
                })
            }
            Command::CloseSession { session_id, reason } => {
                let session_id = session_id
                    .parse::<SessionId>()
                    .with_context(|| format!("Invalid session id '{}'", session_id))?;
                let result = match reason {
                    Some(reason) => self
                        .core
                        .ledger
                        .close_session_with_reason(&session_id, now, &reason)?,
                    None => self.core.ledger.close_session(&session_id, now)?,
                };
                self.print(&result, || {
                    let mut text = format!(
                        "Session {} on {} closed after {} ({} balance {} -> {})",
                        result.session_id,
                        result.machine_id,
                        format_hours_minutes(result.elapsed_minutes),
                        result.category,
                        format_hours_minutes(result.balance_before),
                        format_hours_minutes(result.balance_after),
                    );
                    if result.unbilled_minutes > 0 {
                        text.push_str(&format!(
                            "\n{} minute(s) exceeded the balance and were not charged",
                            result.unbilled_minutes
                        ));
                    }
                    text
                })
            }
            Command::Credit {
                client,
                category,
                minutes,
            } => {
                let category = category.parse::<PlatformCategory>()?;
                let balance = self
                    .core
                    .ledger
                    .credit_minutes(&ClientId::new(client), category, minutes)?;
                self.print_balance(&balance)
            }
            Command::Balance { client } => {
                let balance = self.core.ledger.balance(&ClientId::new(client))?;
                self.print_balance(&balance)
            }
            Command::Audit { limit } => {
                let events = self.store.get_recent_audits(limit)?;
                self.print(&events, || {
                    events
                        .iter()
                        .map(|e| {
                            format!(
                                "{:>6}  {}  {}",
                                e.id,
                                format_datetime_full(&e.timestamp),
                                describe_audit(e)
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                })
            }
        }
    }

    fn machines(&self, now: DateTime<Local>) -> Result<()> {
        #[derive(Serialize)]
        struct MachineStatus {
            id: MachineId,
            category: PlatformCategory,
            label: Option<String>,
            busy: Option<String>,
        }

        let mut statuses = Vec::new();
        for machine in self.store.list_machines()? {
            let busy = self
                .core
                .coordinator
                .detector()
                .machine_busy_at(&machine.id, &now)?
                .map(|info| info.to_string());
            statuses.push(MachineStatus {
                id: machine.id,
                category: machine.category,
                label: machine.label,
                busy,
            });
        }

        if statuses.is_empty() && self.config.machines.is_empty() {
            warn!("No machines configured");
        }

        self.print(&statuses, || {
            statuses
                .iter()
                .map(|s| {
                    format!(
                        "{:<12} {:<12} {:<20} {}",
                        s.id,
                        s.category,
                        s.label.as_deref().unwrap_or("-"),
                        s.busy.as_deref().unwrap_or("free")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
    }

    fn print<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            let text = text();
            if !text.is_empty() {
                println!("{}", text);
            }
        }
        Ok(())
    }

    fn print_booking(&self, booking: &Booking) -> Result<()> {
        self.print(booking, || format_booking(booking))
    }

    fn print_bookings(&self, bookings: &[Booking]) -> Result<()> {
        self.print(&bookings, || {
            if bookings.is_empty() {
                "No bookings".to_string()
            } else {
                bookings
                    .iter()
                    .map(format_booking)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        })
    }

    fn print_balance(&self, balance: &venue_api::ClientBalance) -> Result<()> {
        self.print(balance, || {
            PlatformCategory::ALL
                .iter()
                .map(|c| {
                    format!(
                        "{:<12} {}",
                        c.as_str(),
                        format_hours_minutes(balance.minutes(*c))
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
    }
}

fn parse_time(s: &str) -> Result<DateTime<Local>> {
    parse_local_datetime(s)
        .ok_or_else(|| anyhow!("Invalid time '{}', expected YYYY-MM-DD HH:MM", s))
}

fn parse_window(start: &str, end: Option<&str>) -> Result<TimeWindow> {
    let start = parse_time(start)?;
    let end = end.map(parse_time).transpose()?;
    Ok(TimeWindow::new(start, end)?)
}

fn parse_booking_id(s: &str) -> Result<BookingId> {
    s.parse::<BookingId>()
        .with_context(|| format!("Invalid booking id '{}'", s))
}

fn format_booking(booking: &Booking) -> String {
    let machines = booking
        .machine_ids
        .iter()
        .map(MachineId::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{}  {:<11} {}  {}  [{}]",
        booking.id,
        booking.kind(),
        booking.window,
        booking.details.label(),
        machines
    )
}

fn describe_audit(event: &AuditEvent) -> String {
    match &event.event {
        AuditEventType::MachinesLoaded { machine_count } => {
            format!("{} machine(s) loaded", machine_count)
        }
        AuditEventType::BookingCreated {
            booking_id,
            kind,
            window,
            ..
        } => format!("{} booking {} created for {}", kind, booking_id, window),
        AuditEventType::BookingUpdated {
            booking_id, window, ..
        } => format!("booking {} moved to {}", booking_id, window),
        AuditEventType::BookingDeleted { booking_id } => {
            format!("booking {} deleted", booking_id)
        }
        AuditEventType::BookingRejected { kind, conflict, .. } => {
            format!("{} booking rejected: {}", kind, conflict)
        }
        AuditEventType::SessionOpened {
            session_id,
            client_id,
            machine_id,
        } => format!(
            "session {} opened by {} on {}",
            session_id, client_id, machine_id
        ),
        AuditEventType::SessionClosed {
            session_id,
            elapsed_minutes,
            unbilled_minutes,
            ..
        } => format!(
            "session {} closed after {} min ({} unbilled)",
            session_id, elapsed_minutes, unbilled_minutes
        ),
        AuditEventType::BalanceCredited {
            client_id,
            category,
            minutes,
        } => format!("{} {} minute(s) credited to {}", minutes, category, client_id),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "venued starting");

    let service = Service::new(&args)?;
    service.run(args.command).await
}
