use clap::Parser;
use service_catalog::catalog::RecordPatch;
use service_catalog::cli::{Cli, Commands};
use service_catalog::config::Config;
use service_catalog::logging::init_logging;
use service_catalog::{commands, server};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        Cli::parse_from(["service-catalog", "--help"]);
        return Ok(());
    };

    let config = Config::load(cli.config.as_deref())?;
    init_logging(config.logging.format, &config.logging.level);

    let store = commands::open_store(&config)?;

    match command {
        Commands::List {
            category,
            search,
            json,
        } => {
            let records = commands::list(&store, category.as_deref(), search.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No services found");
            } else {
                println!("{}", commands::render_table(&records));
            }
        }
        Commands::Get { name, json } => {
            let record = commands::get(&store, &name)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("{}", commands::render_record(&record));
            }
        }
        Commands::Add {
            name,
            category,
            description,
        } => {
            let record = commands::add(&store, &name, &category, &description)?;
            println!("Created service: {}", record.name);
        }
        Commands::Update {
            name,
            new_name,
            category,
            description,
        } => {
            let patch = RecordPatch {
                name: new_name,
                category,
                description,
            };
            let record = commands::update(&store, &name, patch)?;
            println!("Updated service: {}", record.name);
        }
        Commands::Delete { name } => {
            commands::delete(&store, &name)?;
            println!("Deleted service: {name}");
        }
        Commands::Categories => {
            for category in commands::categories(&store)? {
                println!("{category}");
            }
        }
        Commands::Serve { addr } => {
            let mut server_config = config.server.clone();
            if let Some(addr) = addr {
                server_config.addr = addr;
            }
            // The store outlives the runtime so a blocking HTTP client inside
            // the backend is never dropped on a runtime thread.
            tokio::runtime::Runtime::new()?
                .block_on(server::serve(store.clone(), &server_config))?;
        }
    }

    Ok(())
}
