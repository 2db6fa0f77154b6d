use std::error::Error;
use std::path::Path;

use clap::Parser;
use empleo::analysis::vacancies::{analyze_vacancies, SummaryStats};
use empleo::db::bue::vacancies_archive::process_vacancies;
use empleo::db::prod_db::ProdDb;
use log::info;
use tabled::{builder::Builder, settings::Style};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,
}

/// Make an ASCII table from the summary stats
fn ascii_table(stats: &SummaryStats) -> tabled::Table {
    let fmt_salary = |v: Option<f64>| match v {
        Some(v) => format!("${:.2}", v),
        None => "n/a".to_string(),
    };
    let mut builder = Builder::new();
    builder.push_record(vec!["Metric", "Value"]);
    builder.push_record(vec![
        "Total vacancies".to_string(),
        stats.total_vacancies.to_string(),
    ]);
    builder.push_record(vec![
        "Departments".to_string(),
        stats.departments_count.to_string(),
    ]);
    builder.push_record(vec![
        "Avg salary min".to_string(),
        fmt_salary(stats.avg_salary_min),
    ]);
    builder.push_record(vec![
        "Avg salary max".to_string(),
        fmt_salary(stats.avg_salary_max),
    ]);
    builder.push_record(vec![
        "Most common contract".to_string(),
        stats
            .most_common_contract
            .clone()
            .unwrap_or_else(|| "n/a".to_string()),
    ]);
    let mut table = builder.build();
    table.with(Style::empty());
    table
}

/// Run this job once a day, after the board refreshes
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let env_file = format!(".env/{}.env", args.env);
    if Path::new(&env_file).exists() {
        dotenvy::from_path(Path::new(&env_file))?;
    }

    let archive = ProdDb::bue_vacancies();

    let vacancies = archive.fetch_vacancies()?;
    info!("fetched {} vacancies", vacancies.len());

    let rows = process_vacancies(vacancies)?;

    let stats = analyze_vacancies(&rows, Path::new(&archive.analysis_dir))?;
    info!("wrote charts and summary to {}", archive.analysis_dir);
    println!("{}", ascii_table(&stats));

    let n = archive.update_duckdb(&rows)?;
    info!("{} rows were updated", n);

    println!("Data processing completed successfully!");
    Ok(())
}
