use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use herd_core::dates::{format_date, parse_date};
use herd_core::*;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "herdbook")]
#[command(about = "Dairy herd treatments, breeding and pharmacy stock", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Owner (farm) to work on
    #[arg(long, global = true)]
    owner: Option<OwnerId>,

    /// Pretend today is this date (YYYY-MM-DD)
    #[arg(long, global = true, value_parser = parse_day)]
    today: Option<NaiveDate>,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring a bought-in animal into the herd
    Acquire {
        animal_id: AnimalId,

        #[arg(long, value_parser = parse_day)]
        birth: Option<NaiveDate>,

        /// Grown cow: its treatments never count as calf stock
        #[arg(long)]
        adult: bool,
    },

    /// Register a calf born on the farm
    RegisterCalf {
        animal_id: AnimalId,

        #[arg(long, value_parser = parse_day)]
        birth: Option<NaiveDate>,
    },

    /// Take an animal out of the herd, keeping its records
    Remove { animal_id: AnimalId },

    /// Delete an animal and all its records
    Purge { animal_id: AnimalId },

    /// Record a treatment
    Treat {
        animal_id: AnimalId,

        /// Medication given, as name=quantity (repeatable)
        #[arg(long = "med", value_parser = parse_med)]
        meds: Vec<(String, i64)>,

        /// Treatment date (defaults to today)
        #[arg(long, value_parser = parse_day)]
        date: Option<NaiveDate>,

        #[arg(long, default_value = "")]
        note: String,
    },

    /// Show an animal's treatment quota
    Quota { animal_id: AnimalId },

    /// Record an insemination
    Inseminate {
        animal_id: AnimalId,

        #[arg(long, value_parser = parse_day)]
        date: Option<NaiveDate>,
    },

    /// Record an ultrasound result
    Ultrasound {
        animal_id: AnimalId,

        /// The ultrasound did not confirm a pregnancy
        #[arg(long)]
        negative: bool,
    },

    /// Confirm dry-off
    DryOff { animal_id: AnimalId },

    /// Confirm calving preparation
    CalvingPrep { animal_id: AnimalId },

    /// Confirm calving
    Calving {
        animal_id: AnimalId,

        #[arg(long)]
        abortion: bool,
    },

    /// Show or change the owner's lead days
    Settings {
        #[arg(long, requires = "prep_days")]
        dry_off_days: Option<i64>,

        #[arg(long, requires = "dry_off_days")]
        prep_days: Option<i64>,
    },

    /// Upcoming dry-off, preparation and calving dates
    Dashboard,

    /// Add a medication to the catalog
    Medication { name: String, unit: String },

    /// Record medication coming into stock
    Prescribe {
        #[arg(long = "med", value_parser = parse_med, required = true)]
        meds: Vec<(String, i64)>,

        #[arg(long, value_parser = parse_day)]
        date: Option<NaiveDate>,
    },

    /// Write off expired stock
    WriteOff {
        #[arg(long = "med", value_parser = parse_med, required = true)]
        meds: Vec<(String, i64)>,

        #[arg(long, value_parser = parse_day)]
        date: Option<NaiveDate>,
    },

    /// Record a hand-counted opening stock for a year
    SeedStock {
        year: i32,

        #[arg(long = "med", value_parser = parse_med)]
        meds: Vec<(String, i64)>,
    },

    /// Recompute and show a year's pharmacy summary
    Summary { year: i32 },

    /// Every stock movement, most recent first
    History,
}

fn parse_day(value: &str) -> std::result::Result<NaiveDate, String> {
    parse_date(value).map_err(|e| e.to_string())
}

fn parse_med(value: &str) -> std::result::Result<(String, i64), String> {
    let (name, quantity) = value
        .split_once('=')
        .ok_or_else(|| format!("expected name=quantity, got {:?}", value))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing medication name in {:?}", value));
    }
    let quantity = quantity
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid quantity in {:?}: {}", value, e))?;
    Ok((name.to_string(), quantity))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    herd_core::logging::init_with_level(&config.logging.level);

    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    let owner = cli.owner.unwrap_or(config.farm.owner_id);
    let today = cli.today.unwrap_or_else(|| SystemClock.today());
    let herd = Herd::new(FileStore::new(data_dir), FixedClock(today));

    run(&herd, owner, cli.command)
}

fn run(herd: &Herd<FileStore, FixedClock>, owner: OwnerId, command: Commands) -> Result<()> {
    let today = herd.today();

    match command {
        Commands::Acquire {
            animal_id,
            birth,
            adult,
        } => {
            let animal = herd.acquire_animal(owner, animal_id, birth, adult)?;
            println!("✓ Acquired animal {} ({:?})", animal.animal_id, animal.origin);
        }

        Commands::RegisterCalf { animal_id, birth } => {
            herd.register_juvenile(owner, animal_id, birth)?;
            println!("✓ Registered calf {}", animal_id);
        }

        Commands::Remove { animal_id } => {
            herd.remove_from_herd(owner, animal_id)?;
            println!("✓ Animal {} left the herd", animal_id);
        }

        Commands::Purge { animal_id } => {
            herd.purge_animal(owner, animal_id)?;
            println!("✓ Animal {} deleted", animal_id);
        }

        Commands::Treat {
            animal_id,
            meds,
            date,
            note,
        } => {
            let medications = Quantities::from_entries(meds)?;
            let status = herd.record_treatment(
                owner,
                animal_id,
                NewTreatment::new(date.unwrap_or(today), medications, note),
            )?;
            println!("✓ Treatment recorded for animal {}", animal_id);
            print_quota(&status)?;
        }

        Commands::Quota { animal_id } => {
            print_quota(&herd.quota_status(owner, animal_id)?)?;
        }

        Commands::Inseminate { animal_id, date } => {
            let record = herd.record_insemination(owner, animal_id, date.unwrap_or(today))?;
            println!(
                "✓ Insemination recorded for animal {} on {}",
                animal_id,
                format_date(record.insemination)?
            );
        }

        Commands::Ultrasound {
            animal_id,
            negative,
        } => {
            let record = herd.confirm_ultrasound(owner, animal_id, !negative)?;
            match DerivedDates::of(&record) {
                Some(dates) => print_dates(animal_id, &dates)?,
                None => println!("✓ Animal {}: cycle marked not pregnant", animal_id),
            }
        }

        Commands::DryOff { animal_id } => {
            herd.confirm_dry_off(owner, animal_id)?;
            println!("✓ Dry-off confirmed for animal {}", animal_id);
        }

        Commands::CalvingPrep { animal_id } => {
            herd.confirm_calving_prep(owner, animal_id)?;
            println!("✓ Calving preparation confirmed for animal {}", animal_id);
        }

        Commands::Calving {
            animal_id,
            abortion,
        } => {
            herd.confirm_calving(owner, animal_id, abortion)?;
            if abortion {
                println!("✓ Abortion recorded for animal {}", animal_id);
            } else {
                println!(
                    "✓ Calving recorded for animal {} (register the calf with register-calf)",
                    animal_id
                );
            }
        }

        Commands::Settings {
            dry_off_days,
            prep_days,
        } => {
            if let (Some(dry), Some(prep)) = (dry_off_days, prep_days) {
                let changes = herd.update_settings(owner, dry, prep)?;
                println!("✓ Settings saved, {} pregnancies rescheduled", changes.len());
                for change in &changes {
                    print_dates(change.animal_id, &change.after)?;
                }
            } else {
                let settings = herd.settings(owner)?;
                println!("Dry-off lead:      {} days", settings.dry_off_lead_days);
                println!("Calving prep lead: {} days", settings.calving_prep_lead_days);
                for (name, unit) in &settings.medication_catalog {
                    println!("  {} ({})", name, unit);
                }
            }
        }

        Commands::Dashboard => {
            let snapshot = herd.valid_reproduction_snapshot(owner)?;
            if snapshot.is_empty() {
                println!("No ongoing pregnancies.");
            }
            for (animal_id, record) in &snapshot {
                if let Some(dates) = DerivedDates::of(record) {
                    print_dates(*animal_id, &dates)?;
                }
            }
        }

        Commands::Medication { name, unit } => {
            if herd.add_medication(owner, &name, &unit)? {
                println!("✓ Added {} ({})", name, unit);
            } else {
                println!("{} is already in the catalog", name);
            }
        }

        Commands::Prescribe { meds, date } => {
            let prescription =
                herd.add_prescription(owner, date.unwrap_or(today), Quantities::from_entries(meds)?)?;
            println!("✓ Prescription recorded: {}", render(&prescription.items));
        }

        Commands::WriteOff { meds, date } => {
            let writeoff = herd.add_expiry_writeoff(
                owner,
                date.unwrap_or(today),
                Quantities::from_entries(meds)?,
            )?;
            println!("✓ Written off: {}", render(&writeoff.items));
        }

        Commands::SeedStock { year, meds } => {
            let summary = herd.seed_year_stock(owner, year, Quantities::from_entries(meds)?)?;
            println!(
                "✓ Opening stock for {}: {}",
                year,
                render(&summary.remaining_stock)
            );
        }

        Commands::Summary { year } => {
            let summary = herd.update_year_summary(owner, year)?;
            println!("Pharmacy {}{}", year, if summary.seeded { " (seeded)" } else { "" });
            println!("  entered:    {}", render(&summary.entered));
            println!("  used:       {}", render(&summary.used));
            println!("  on calves:  {}", render(&summary.used_on_juveniles));
            println!("  expired:    {}", render(&summary.written_off_expired));
            println!("  removed:    {}", render(&summary.total_removed));
            println!("  remaining:  {}", render(&summary.remaining_stock));
        }

        Commands::History => {
            for entry in herd.history(owner)? {
                println!(
                    "{}  {:<14} {}",
                    format_date(entry.date)?,
                    entry.event.to_string(),
                    render(&entry.medications)
                );
            }
        }
    }

    Ok(())
}

fn print_quota(status: &QuotaStatus) -> Result<()> {
    if status.is_exceeded() {
        println!(
            "  ⚠ Over quota: {} treatments in the last year (limit {})",
            status.used, MAX_TREATMENTS_PER_WINDOW
        );
    } else {
        println!("  Treatments left this year: {}", status.remaining);
    }
    if let Some(next) = status.next_eligible {
        println!("  Next eligible: {}", format_date(next)?);
    }
    Ok(())
}

fn print_dates(animal_id: AnimalId, dates: &DerivedDates) -> Result<()> {
    println!(
        "  {}: dry-off {}, calving prep {}, calving {}",
        animal_id,
        format_date(dates.dry_off)?,
        format_date(dates.calving_prep)?,
        format_date(dates.expected_calving)?
    );
    Ok(())
}

fn render(quantities: &Quantities) -> String {
    if quantities.is_empty() {
        return "-".into();
    }
    quantities
        .iter()
        .map(|(name, quantity)| format!("{}={}", name, quantity))
        .collect::<Vec<_>>()
        .join(", ")
}
