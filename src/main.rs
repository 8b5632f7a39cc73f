use clap::Parser;
use nhgis_client::config::cli::metadata_query;
use nhgis_client::utils::{logger, validation::Validate};
use nhgis_client::{
    nhgis_list_files, read_nhgis, read_nhgis_shp, read_nhgis_text, CliConfig, Command,
    ExtractRef, ExtractService, NhgisApiClient, NhgisError, PollOptions, Result, TomlConfig,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = CliConfig::parse();

    // 初始化日誌
    if config.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::info!("Starting nhgis CLI");
    tracing::debug!("Command: {:?}", config.command);

    // 載入 TOML 擷取定義
    let extract_file = match &config.command {
        Command::Submit { config: path, .. } => {
            tracing::info!("📁 Loading extract definition from: {}", path);
            match TomlConfig::from_file(path) {
                Ok(file) => Some(file),
                Err(e) => {
                    eprintln!("❌ Failed to load extract file '{}': {}", path, e);
                    eprintln!("💡 Make sure the file exists and is valid TOML format");
                    std::process::exit(1);
                }
            }
        }
        _ => None,
    };
    if let Some(file) = &extract_file {
        config.merge_client_section(&file.client);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    if let Err(e) = run(&config, extract_file).await {
        tracing::error!(
            "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

        let exit_code = e.exit_code();
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }

    Ok(())
}

async fn run(config: &CliConfig, extract_file: Option<TomlConfig>) -> Result<()> {
    match &config.command {
        Command::Submit {
            wait,
            download_dir,
            dry_run,
            ..
        } => {
            let file = extract_file.ok_or_else(|| NhgisError::config("no extract file loaded"))?;
            file.validate()?;

            if *dry_run {
                tracing::info!("🔍 DRY RUN MODE - the extract will not be submitted");
                println!("{}", serde_json::to_string_pretty(&file.extract.build()?)?);
                return Ok(());
            }

            let client = NhgisApiClient::from_config(config)?;
            let extract = client.submit_extract(&file.extract).await?;
            println!("✅ Submitted {}", extract);

            let download_dir = download_dir.as_deref().or(file.download_dir());
            if *wait || download_dir.is_some() {
                client
                    .wait_for_extract(&extract, &file.poll_options())
                    .await?;
                println!("✅ {} is complete", extract);
            }

            if let Some(dir) = download_dir {
                tokio::fs::create_dir_all(dir).await?;
                download(&client, &extract, Path::new(dir)).await?;
            }
        }

        Command::Status { number, collection } => {
            let client = NhgisApiClient::from_config(config)?;
            let extract = ExtractRef::new(collection.as_str(), *number)?;
            let status = client.extract_status(&extract).await?;
            println!("{}: {}", extract, status);
        }

        Command::Wait {
            number,
            collection,
            timeout,
        } => {
            let client = NhgisApiClient::from_config(config)?;
            let extract = ExtractRef::new(collection.as_str(), *number)?;
            let options = PollOptions {
                timeout: timeout.map(Duration::from_secs),
                ..PollOptions::default()
            };
            client.wait_for_extract(&extract, &options).await?;
            println!("✅ {} is complete", extract);
        }

        Command::Download {
            number,
            collection,
            dir,
        } => {
            let client = NhgisApiClient::from_config(config)?;
            let extract = ExtractRef::new(collection.as_str(), *number)?;
            download(&client, &extract, Path::new(dir)).await?;
        }

        Command::Resubmit { number, collection } => {
            let client = NhgisApiClient::from_config(config)?;
            let previous = ExtractRef::new(collection.as_str(), *number)?;
            let definition = client.get_extract_definition(&previous).await?;
            definition.validate()?;
            let extract = client.submit_extract(&definition).await?;
            println!("✅ Resubmitted {} as {}", previous, extract);
        }

        Command::History { limit } => {
            let client = NhgisApiClient::from_config(config)?;
            for info in client.get_previous_extracts(*limit).await? {
                let description = info
                    .extract_definition
                    .as_ref()
                    .and_then(|d| d.get("description"))
                    .and_then(|d| d.as_str())
                    .unwrap_or("");
                println!("{:>6}  {:<10}  {}", info.number, info.status, description);
            }
        }

        Command::Metadata {
            metadata_type,
            dataset,
            data_table,
            time_series_table,
            output,
        } => {
            let query = metadata_query(
                metadata_type.as_deref(),
                dataset.as_deref(),
                data_table.as_deref(),
                time_series_table.as_deref(),
            )?;
            let client = NhgisApiClient::from_config(config)?;
            let metadata = client.nhgis_metadata(&query).await?;
            let json = serde_json::to_string_pretty(&metadata)?;

            match output {
                Some(path) => {
                    tokio::fs::write(path, json).await?;
                    println!("📁 Metadata saved to: {}", path);
                }
                None => println!("{}", json),
            }
        }

        Command::ListFiles { archive, pattern } => {
            for name in nhgis_list_files(archive, pattern.as_deref())? {
                println!("{}", name);
            }
        }

        Command::ReadCsv {
            archive,
            select,
            head,
        } => {
            let table = read_nhgis(archive, select.as_deref())?;
            table.write_csv(std::io::stdout().lock(), *head)?;
            println!("... {} rows in {}", table.len(), table.source());
        }

        Command::ReadShp { archive, select } => {
            let table = read_nhgis_shp(archive, select.as_deref())?;
            let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
            for shape in table.shapes() {
                *by_type
                    .entry(format!("{:?}", shape.shapetype()))
                    .or_default() += 1;
            }

            println!("{}: {} features", table.source, table.len());
            for (shape_type, count) in by_type {
                println!("  {:<12} {}", shape_type, count);
            }
            if let Some(projection) = &table.projection {
                println!("  projection: {}", projection.trim());
            }
        }

        Command::Codebook { archive, select } => {
            print!("{}", read_nhgis_text(archive, select.as_deref())?);
        }
    }

    Ok(())
}

async fn download(client: &NhgisApiClient, extract: &ExtractRef, dir: &Path) -> Result<()> {
    let files = client.download_extract(extract, dir).await?;
    for file in files {
        println!("📁 Downloaded: {}", file.display());
    }
    Ok(())
}
