use chrono::{NaiveDate, NaiveDateTime};
use clap::{Args, Parser, Subcommand};
use medrem_core::notify::NotificationSink;
use medrem_core::tracker::{SETTING_NOTIFICATIONS, SETTING_REMINDER_ADVANCE};
use medrem_core::*;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "medrem")]
#[command(about = "Medicine reminder and adherence tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Pretend the current local time is YYYY-MM-DDTHH:MM
    #[arg(long, global = true, hide = true, value_parser = parse_at)]
    at: Option<NaiveDateTime>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show today's doses (default)
    Today {
        /// Show another day instead (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
    },

    /// Add a medicine and schedule its doses
    Add(MedicineArgs),

    /// Edit a medicine; unspecified fields keep their value
    Edit {
        id: Uuid,
        #[command(flatten)]
        fields: MedicineArgs,

        /// Clear the critical flag
        #[arg(long, conflicts_with = "critical")]
        no_critical: bool,

        /// Drop the course length so the medicine runs open-ended
        #[arg(long, conflicts_with = "days")]
        open_ended: bool,
    },

    /// List medicines
    List {
        /// all, active, completed or critical
        #[arg(long, default_value = "all")]
        filter: String,

        /// Only medicines whose name, dosage or instructions match
        #[arg(long)]
        search: Option<String>,
    },

    /// Delete a medicine and all of its doses
    Delete { id: Uuid },

    /// Mark a medicine's course as completed
    Complete { id: Uuid },

    /// Put a completed medicine back on the active list
    Reactivate { id: Uuid },

    /// Mark a dose as taken
    Take {
        #[arg(required_unless_present = "all")]
        id: Option<Uuid>,

        /// Take every pending dose for the day
        #[arg(long, conflicts_with = "id")]
        all: bool,

        /// Day used with --all (YYYY-MM-DD)
        #[arg(long, requires = "all")]
        date: Option<String>,
    },

    /// Mark a dose as skipped
    Skip { id: Uuid },

    /// Mark overdue pending doses as missed
    Sweep,

    /// Doses coming up soon
    Upcoming {
        /// Look-ahead in minutes
        #[arg(long)]
        window: Option<i64>,
    },

    /// Adherence statistics
    Stats {
        /// Weeks back from the current week
        #[arg(long, default_value_t = 0)]
        week: i64,
    },

    /// Achievements, points and level
    Achievements,

    /// Emergency contacts
    Contact {
        #[command(subcommand)]
        action: ContactAction,
    },

    /// Show or change a setting
    Setting {
        key: Option<String>,
        /// JSON value (plain text is stored as a string)
        value: Option<String>,
    },

    /// Show or change medical information
    Info {
        key: Option<String>,
        /// JSON value (plain text is stored as a string)
        value: Option<String>,
    },

    /// Export all data as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Replace all data with an exported bundle
    Import { path: PathBuf },

    /// Write the dose history as CSV
    Report { path: PathBuf },

    /// Erase all data
    Clear {
        /// Confirm erasing everything
        #[arg(long)]
        yes: bool,
    },

    /// Sweep and announce reminders on an interval
    Watch {
        /// Seconds between checks (config default when omitted)
        #[arg(long)]
        interval: Option<u64>,

        /// Interval in milliseconds, overrides --interval
        #[arg(long, hide = true)]
        interval_ms: Option<u64>,

        /// Stop after this many checks
        #[arg(long)]
        ticks: Option<u32>,
    },
}

#[derive(Args, Clone, Default)]
struct MedicineArgs {
    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    dosage: Option<String>,

    /// tablet, capsule, syrup, injection, drops, inhaler or other
    #[arg(long)]
    form: Option<String>,

    /// once, twice, thrice, four or custom (inferred from --time when omitted)
    #[arg(long)]
    frequency: Option<String>,

    /// Time of day HH:MM, repeat for each dose
    #[arg(long = "time")]
    times: Vec<String>,

    /// First day (YYYY-MM-DD), defaults to today
    #[arg(long)]
    start: Option<String>,

    /// Course length in days, open-ended when omitted
    #[arg(long)]
    days: Option<u32>,

    #[arg(long)]
    instructions: Option<String>,

    #[arg(long)]
    critical: bool,
}

#[derive(Subcommand)]
enum ContactAction {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        relation: Option<String>,
    },
    List,
    Remove {
        id: Uuid,
    },
}

/// Wall clock, or a pinned instant for scripted runs
#[derive(Clone, Copy)]
enum CliClock {
    System(SystemClock),
    Pinned(NaiveDateTime),
}

impl Clock for CliClock {
    fn now(&self) -> NaiveDateTime {
        match self {
            CliClock::System(clock) => clock.now(),
            CliClock::Pinned(at) => *at,
        }
    }
}

/// Prints notifications as they are delivered
struct ConsoleSink;

impl NotificationSink for ConsoleSink {
    fn deliver(&mut self, _at: NaiveDateTime, notification: &Notification) -> Result<()> {
        match notification {
            Notification::AchievementUnlocked {
                title,
                icon,
                points,
                ..
            } => println!("{} Achievement unlocked: {} (+{} points)", icon, title, points),
            Notification::ReminderDue {
                medicine_name,
                dosage,
                critical,
                scheduled_at,
                ..
            } => println!(
                "{} Time for {} {} at {}",
                if *critical { "🚨" } else { "⏰" },
                medicine_name,
                dosage,
                scheduled_at.format("%H:%M")
            ),
        }
        Ok(())
    }
}

type Tracker = MedicineTracker<JsonFileStore, CliClock>;

fn main() -> Result<()> {
    // Initialize logging
    medrem_core::logging::init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(dir) = cli.data_dir {
        config.data.data_dir = dir;
    }
    let clock = match cli.at {
        Some(at) => CliClock::Pinned(at),
        None => CliClock::System(SystemClock),
    };

    let result = open_tracker(config, clock).and_then(|tracker| run(tracker, cli.command));
    match result {
        Err(e) if e.is_not_found() => {
            eprintln!("Warning: {}", e);
            Ok(())
        }
        other => other,
    }
}

fn open_tracker(config: Config, clock: CliClock) -> Result<Tracker> {
    let mut tracker = MedicineTracker::open(config, clock)?;
    tracker.add_sink(Box::new(ConsoleSink));
    Ok(tracker)
}

fn run(mut tracker: Tracker, command: Option<Commands>) -> Result<()> {
    match command {
        Some(Commands::Today { date }) => cmd_today(&tracker, date),
        Some(Commands::Add(args)) => cmd_add(&mut tracker, args),
        Some(Commands::Edit {
            id,
            fields,
            no_critical,
            open_ended,
        }) => cmd_edit(&mut tracker, id, fields, no_critical, open_ended),
        Some(Commands::List { filter, search }) => cmd_list(&tracker, &filter, search),
        Some(Commands::Delete { id }) => {
            let removed = tracker.delete_medicine(id)?;
            println!("✓ Deleted medicine and {} doses", removed);
            Ok(())
        }
        Some(Commands::Complete { id }) => {
            let medicine = tracker.complete_medicine(id)?;
            println!("✓ {} marked as completed", medicine.name);
            Ok(())
        }
        Some(Commands::Reactivate { id }) => {
            let medicine = tracker.reactivate_medicine(id)?;
            println!("✓ {} is active again", medicine.name);
            Ok(())
        }
        Some(Commands::Take { id, all, date }) => cmd_take(&mut tracker, id, all, date),
        Some(Commands::Skip { id }) => {
            report_transition("skipped", tracker.mark_skipped(id)?);
            Ok(())
        }
        Some(Commands::Sweep) => {
            match tracker.sweep_missed()? {
                SweepOutcome::Ran(n) => println!("✓ Marked {} overdue doses as missed", n),
                SweepOutcome::AlreadyRunning => println!("Sweep already running"),
            }
            Ok(())
        }
        Some(Commands::Upcoming { window }) => cmd_upcoming(&tracker, window),
        Some(Commands::Stats { week }) => cmd_stats(&tracker, week),
        Some(Commands::Achievements) => cmd_achievements(&tracker),
        Some(Commands::Contact { action }) => cmd_contact(&mut tracker, action),
        Some(Commands::Setting { key, value }) => cmd_setting(&mut tracker, key, value),
        Some(Commands::Info { key, value }) => cmd_info(&mut tracker, key, value),
        Some(Commands::Export { output }) => cmd_export(&tracker, output),
        Some(Commands::Import { path }) => cmd_import(&mut tracker, &path),
        Some(Commands::Report { path }) => {
            let count = tracker.write_report(&path)?;
            println!("✓ Wrote {} doses to {}", count, path.display());
            Ok(())
        }
        Some(Commands::Clear { yes }) => {
            if !yes {
                return Err(Error::validation("refusing to erase data without --yes"));
            }
            tracker.clear_all()?;
            println!("✓ All data cleared");
            Ok(())
        }
        Some(Commands::Watch {
            interval,
            interval_ms,
            ticks,
        }) => cmd_watch(tracker, interval, interval_ms, ticks),
        None => cmd_today(&tracker, None),
    }
}

fn parse_at(s: &str) -> std::result::Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
        .map_err(|e| format!("expected YYYY-MM-DDTHH:MM: {}", e))
}

fn parse_day(date: Option<String>, tracker: &Tracker) -> Result<NaiveDate> {
    match date {
        Some(d) => dates::parse_date(&d),
        None => Ok(tracker.clock().today()),
    }
}

/// Text is stored as a JSON string unless it already parses as JSON
fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn frequency_for(count: usize) -> Frequency {
    match count {
        1 => Frequency::Once,
        2 => Frequency::Twice,
        3 => Frequency::Thrice,
        4 => Frequency::Four,
        _ => Frequency::Custom,
    }
}

fn parse_times(raw: &[String]) -> Result<Vec<DoseTime>> {
    raw.iter().map(|t| t.parse()).collect()
}

fn cmd_add(tracker: &mut Tracker, args: MedicineArgs) -> Result<()> {
    let times = parse_times(&args.times)?;
    let frequency = match args.frequency {
        Some(f) => f.parse()?,
        None => frequency_for(times.len()),
    };
    let draft = MedicineDraft {
        name: args.name.unwrap_or_default(),
        dosage: args.dosage.unwrap_or_default(),
        form: match args.form {
            Some(f) => f.parse()?,
            None => MedicineForm::default(),
        },
        frequency,
        times,
        start_date: parse_day(args.start, tracker)?,
        duration_days: args.days,
        instructions: args.instructions,
        critical: args.critical,
    };

    let medicine = tracker.add_medicine(draft)?;
    let doses = tracker.medicine_stats(medicine.id)?.total;
    println!("✓ Added {} ({})", medicine.name, medicine.id);
    println!("  {} doses scheduled from {}", doses, medicine.start_date);
    Ok(())
}

fn cmd_edit(
    tracker: &mut Tracker,
    id: Uuid,
    args: MedicineArgs,
    no_critical: bool,
    open_ended: bool,
) -> Result<()> {
    let current = tracker.get_medicine(id)?;

    let times = if args.times.is_empty() {
        current.times.clone()
    } else {
        parse_times(&args.times)?
    };
    let frequency = match args.frequency {
        Some(f) => f.parse()?,
        None if args.times.is_empty() => current.frequency,
        None => frequency_for(times.len()),
    };
    let draft = MedicineDraft {
        name: args.name.unwrap_or(current.name),
        dosage: args.dosage.unwrap_or(current.dosage),
        form: match args.form {
            Some(f) => f.parse()?,
            None => current.form,
        },
        frequency,
        times,
        start_date: match args.start {
            Some(d) => dates::parse_date(&d)?,
            None => current.start_date,
        },
        duration_days: if open_ended {
            None
        } else {
            args.days.or(current.duration_days)
        },
        instructions: args.instructions.or(current.instructions),
        critical: !no_critical && (args.critical || current.critical),
    };

    let medicine = tracker.update_medicine(id, draft)?;
    println!("✓ Updated {}", medicine.name);
    Ok(())
}

fn cmd_list(tracker: &Tracker, filter: &str, search: Option<String>) -> Result<()> {
    let filter: MedicineFilter = filter.parse()?;
    let mut medicines = match search {
        Some(q) => tracker.search(&q)?,
        None => tracker.medicines(MedicineFilter::All)?,
    };
    medicines.retain(|m| filter.matches(m));

    if medicines.is_empty() {
        println!("No medicines.");
        return Ok(());
    }

    for medicine in &medicines {
        let times: Vec<String> = medicine.times.iter().map(|t| t.to_string()).collect();
        let stats = tracker.medicine_stats(medicine.id)?;
        println!(
            "{} {} {} [{}] {:?} {:.0}% adherence{}",
            medicine.id,
            medicine.name,
            medicine.dosage,
            times.join(", "),
            medicine.status,
            stats.adherence,
            if medicine.critical { " (critical)" } else { "" }
        );
    }
    Ok(())
}

fn cmd_today(tracker: &Tracker, date: Option<String>) -> Result<()> {
    let day = parse_day(date, tracker)?;
    let events = tracker.schedule_for(day)?;
    let stats = medrem_core::adherence::day_stats(&events, day);

    println!("{} {}", dates::day_of_week(day), day);
    if events.is_empty() {
        println!("  No doses scheduled.");
        return Ok(());
    }
    for event in &events {
        println!(
            "  {} {} {} [{}] {}{}",
            event.time,
            event.medicine_name,
            event.dosage,
            event.status,
            event.id,
            if event.critical { " ⚠" } else { "" }
        );
    }
    println!(
        "  {}/{} taken, {} pending, {} missed ({:.0}%)",
        stats.taken, stats.total, stats.pending, stats.missed, stats.completion
    );
    Ok(())
}

fn report_transition(verb: &str, transition: Transition) {
    match transition {
        Transition::Applied { from, .. } => println!("✓ Dose {} (was {})", verb, from),
        Transition::Unchanged(status) => println!("Dose already {}, nothing to do", status),
    }
}

fn cmd_take(tracker: &mut Tracker, id: Option<Uuid>, all: bool, date: Option<String>) -> Result<()> {
    if all {
        let day = parse_day(date, tracker)?;
        let taken = tracker.mark_all_taken(day)?;
        println!("✓ Marked {} doses taken for {}", taken, day);
        return Ok(());
    }

    let id = id.ok_or_else(|| Error::validation("a dose id or --all is required"))?;
    report_transition("taken", tracker.mark_taken(id)?);
    Ok(())
}

fn cmd_upcoming(tracker: &Tracker, window: Option<i64>) -> Result<()> {
    let events = tracker.upcoming(window)?;
    if events.is_empty() {
        println!("Nothing due soon.");
    }
    for event in &events {
        println!(
            "  {} {} {} {}",
            event.date, event.time, event.medicine_name, event.dosage
        );
    }
    Ok(())
}

fn cmd_stats(tracker: &Tracker, week: i64) -> Result<()> {
    let today = tracker.today_stats()?;
    let stats = tracker.statistics()?;
    let trend = tracker.daily_trend(30)?;
    let (start, end) = match (trend.first(), trend.last()) {
        (Some(first), Some(last)) => (first.date, last.date),
        _ => (today.date, today.date),
    };

    println!("Today: {}/{} taken ({:.0}%)", today.taken, today.total, today.completion);
    println!("30-day adherence: {:.1}%", tracker.adherence_rate(start, end)?);
    println!("Current streak: {} days", stats.streak_days);
    println!("Perfect days: {}", stats.perfect_days);
    println!("On-time doses: {}", stats.on_time_doses);
    println!("Average timing deviation: {} min", tracker.average_deviation()?);

    println!();
    for day in tracker.weekly_stats(-week)? {
        println!(
            "  {:<9} {} {:>3}/{:<3} {:.0}%",
            dates::day_of_week(day.date),
            day.date,
            day.taken,
            day.total,
            day.completion
        );
    }
    Ok(())
}

fn cmd_achievements(tracker: &Tracker) -> Result<()> {
    let points = tracker.total_points()?;
    let level = tracker.level()?;
    println!("Level {} {} ({} points)", level.level, level.title, points);
    println!();

    for a in tracker.achievements()? {
        let mark = if a.unlocked { "✓" } else { " " };
        println!(
            "[{}] {} {} - {} ({}/{}, {} pts)",
            mark, a.icon, a.title, a.description, a.progress.min(a.target), a.target, a.points
        );
    }

    let goals = tracker.current_goals(3)?;
    if !goals.is_empty() {
        println!();
        println!("Next goals:");
        for goal in goals {
            println!("  {} {:.0}%", goal.title, goal.ratio() * 100.0);
        }
    }
    Ok(())
}

fn cmd_contact(tracker: &mut Tracker, action: ContactAction) -> Result<()> {
    match action {
        ContactAction::Add {
            name,
            phone,
            relation,
        } => {
            let contact = tracker.add_contact(&name, &phone, relation)?;
            println!("✓ Added contact {} ({})", contact.name, contact.id);
        }
        ContactAction::List => {
            for c in tracker.contacts()? {
                println!(
                    "{} {} {} {}",
                    c.id,
                    c.name,
                    c.phone,
                    c.relation.unwrap_or_default()
                );
            }
        }
        ContactAction::Remove { id } => {
            tracker.remove_contact(id)?;
            println!("✓ Contact removed");
        }
    }
    Ok(())
}

fn cmd_setting(tracker: &mut Tracker, key: Option<String>, value: Option<String>) -> Result<()> {
    match (key, value) {
        (Some(key), Some(value)) => {
            tracker.set_setting(&key, parse_value(&value))?;
            println!("✓ {} = {}", key, value);
        }
        (Some(key), None) => match tracker.setting(&key)? {
            Some(value) => println!("{} = {}", key, value),
            None => println!("{} is not set", key),
        },
        (None, _) => {
            println!("notification_enabled = {}", tracker.notifications_enabled()?);
            println!("reminder_advance = {}", tracker.reminder_advance_minutes()?);
            for s in tracker.settings()? {
                if s.key != SETTING_NOTIFICATIONS && s.key != SETTING_REMINDER_ADVANCE {
                    println!("{} = {}", s.key, s.value);
                }
            }
        }
    }
    Ok(())
}

fn cmd_info(tracker: &mut Tracker, key: Option<String>, value: Option<String>) -> Result<()> {
    match (key, value) {
        (Some(key), Some(value)) => {
            tracker.set_medical_info(&key, parse_value(&value))?;
            println!("✓ {} = {}", key, value);
        }
        (key, None) => {
            for info in tracker.medical_info()? {
                if key.as_deref().map_or(true, |k| k == info.key) {
                    println!("{} = {}", info.key, info.value);
                }
            }
        }
        (None, Some(_)) => return Err(Error::validation("a key is required")),
    }
    Ok(())
}

fn cmd_export(tracker: &Tracker, output: Option<PathBuf>) -> Result<()> {
    let bundle = tracker.export_all()?;
    let json = serde_json::to_string_pretty(&bundle)?;

    match output {
        Some(path) => {
            std::fs::write(&path, json)?;
            println!("✓ Exported to {}", path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(json.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}

fn cmd_import(tracker: &mut Tracker, path: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(path)?;
    let bundle: ExportBundle = serde_json::from_str(&contents)
        .map_err(|e| Error::Import(format!("{}: {}", path.display(), e)))?;

    tracker.import_all(bundle)?;
    println!("✓ Imported {}", path.display());
    Ok(())
}

fn cmd_watch(
    tracker: Tracker,
    interval: Option<u64>,
    interval_ms: Option<u64>,
    ticks: Option<u32>,
) -> Result<()> {
    let period = match (interval_ms, interval) {
        (Some(ms), _) => std::time::Duration::from_millis(ms),
        (None, Some(secs)) => std::time::Duration::from_secs(secs),
        (None, None) => {
            std::time::Duration::from_secs(tracker.config().reminders.sweep_interval_secs)
        }
    };

    let tracker = Arc::new(Mutex::new(tracker));
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let worker = Arc::clone(&tracker);
    let task = IntervalTask::spawn(period, move || {
        let mut tracker = match worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = tracker.sweep_missed() {
            tracing::error!("Sweep failed: {}", e);
        }
        if let Err(e) = tracker.due_reminders() {
            tracing::error!("Reminder check failed: {}", e);
        }
        let _ = done_tx.send(());
    });

    println!("Watching for due doses every {:?}", period);
    match ticks {
        Some(n) => {
            for _ in 0..n {
                if done_rx.recv().is_err() {
                    break;
                }
            }
        }
        None => while done_rx.recv().is_ok() {},
    }

    task.stop();
    println!("✓ Stopped");
    Ok(())
}
