use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Table};
use gearman_admin::AdminClient;
use serde::Serialize;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "gm-admin")]
#[command(about = "Gearman job server administration", long_about = None)]
struct Args {
    /// Job server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Job server port
    #[arg(short, long, default_value_t = gearman_core::DEFAULT_PORT)]
    port: u16,

    /// Timeout in milliseconds, 0 waits forever
    #[arg(short, long, default_value = "5000")]
    timeout: u64,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Table,
    Json,
    Yaml,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queued, running and worker counts per function
    Status,

    /// Connected workers and the functions they registered
    Workers,

    /// Server version
    Version,

    /// Server process id
    Getpid,

    /// Server log level
    Verbose,

    /// Limit the queue length of a function
    Maxqueue {
        function: String,

        /// Maximum queued jobs
        size: i64,
    },

    /// Stop the server
    Shutdown {
        /// Let running jobs finish first
        #[arg(short, long)]
        graceful: bool,
    },

    /// Remove a function with no queued jobs or workers
    DropFunction { function: String },

    /// Create an empty function queue
    CreateFunction { function: String },

    /// Jobs currently known to the server
    ShowJobs,

    /// Unique ids of queued jobs
    ShowUniqueJobs,

    /// Cancel a queued job
    CancelJob { handle: String },
}

fn print_table(header: Vec<&str>, rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(header);
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

fn print_records<T: Serialize>(
    format: Format,
    records: &[T],
    header: Vec<&str>,
    row: impl Fn(&T) -> Vec<String>,
) -> anyhow::Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(records)?),
        Format::Yaml => print!("{}", serde_yaml::to_string(records)?),
        Format::Table => print_table(header, records.iter().map(row).collect()),
    }
    Ok(())
}

fn print_value(format: Format, field: &str, value: &str) -> anyhow::Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::json!({ field: value })),
        Format::Yaml => println!("{}: {}", field, value),
        Format::Table => println!("{}", value),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut admin = AdminClient::new(&args.host, args.port);
    admin.set_timeout(Duration::from_millis(args.timeout));
    let format = args.format;

    match args.command {
        Commands::Status => {
            let status = admin.status().await?;
            print_records(
                format,
                &status,
                vec!["Function", "Total", "Running", "Workers"],
                |s| {
                    vec![
                        s.function.clone(),
                        s.total.to_string(),
                        s.running.to_string(),
                        s.available_workers.to_string(),
                    ]
                },
            )?;
        }

        Commands::Workers => {
            let workers = admin.workers().await?;
            print_records(
                format,
                &workers,
                vec!["FD", "Address", "Client ID", "Functions"],
                |w| {
                    vec![
                        w.fd.clone(),
                        w.ip_address.clone(),
                        w.client_id.clone(),
                        w.functions.join(" "),
                    ]
                },
            )?;
        }

        Commands::Version => print_value(format, "version", &admin.version().await?)?,
        Commands::Getpid => print_value(format, "pid", &admin.getpid().await?.to_string())?,
        Commands::Verbose => print_value(format, "verbose", &admin.verbose().await?)?,

        Commands::Maxqueue { function, size } => {
            admin.maxqueue(&function, size).await?;
            println!("Max queue size of {} set to {}", function, size);
        }

        Commands::Shutdown { graceful } => {
            admin.shutdown(graceful).await?;
            println!("Server shutting down");
        }

        Commands::DropFunction { function } => {
            admin.drop_function(&function).await?;
            println!("Function {} dropped", function);
        }

        Commands::CreateFunction { function } => {
            admin.create_function(&function).await?;
            println!("Function {} created", function);
        }

        Commands::ShowJobs => {
            let jobs = admin.show_jobs().await?;
            print_records(
                format,
                &jobs,
                vec!["Handle", "Retries", "Ignore", "Queued"],
                |j| {
                    vec![
                        j.handle.clone(),
                        j.retries.to_string(),
                        j.ignore_job.to_string(),
                        j.job_queued.to_string(),
                    ]
                },
            )?;
        }

        Commands::ShowUniqueJobs => {
            let unique = admin.show_unique_jobs().await?;
            print_records(format, &unique, vec!["Unique ID"], |u| vec![u.clone()])?;
        }

        Commands::CancelJob { handle } => {
            admin.cancel_job(&handle).await?;
            println!("Job {} cancelled", handle);
        }
    }

    Ok(())
}
