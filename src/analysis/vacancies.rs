use itertools::Itertools;
use plotly::common::{Orientation, Title};
use plotly::histogram::Bins;
use plotly::{Bar, Histogram, Layout, Plot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::fs::File;
use std::path::Path;

use crate::db::bue::vacancies_archive::VacancyRow;

/// The five metrics written to `summary_stats.json`.  Averages and the mode
/// are `None` when there is nothing to aggregate.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total_vacancies: usize,
    pub departments_count: usize,
    pub avg_salary_min: Option<f64>,
    pub avg_salary_max: Option<f64>,
    pub most_common_contract: Option<String>,
}

/// Render the three charts and the summary document into `out_dir`, creating
/// it if needed.  Existing files are silently overwritten.
pub fn analyze_vacancies(
    rows: &[VacancyRow],
    out_dir: &Path,
) -> Result<SummaryStats, Box<dyn Error>> {
    fs::create_dir_all(out_dir)?;
    department_chart(rows, out_dir);
    salary_histogram(rows, out_dir);
    contract_chart(rows, out_dir);
    let stats = summary_stats(rows);
    write_summary(&stats, out_dir)?;
    Ok(stats)
}

/// Occurrence counts in descending order.  Ties are broken by first
/// encounter order in the input.
pub fn value_counts<'a, I>(values: I) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for value in values {
        match index.get(value) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(value.to_string(), counts.len());
                counts.push((value.to_string(), 1));
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

pub fn summary_stats(rows: &[VacancyRow]) -> SummaryStats {
    let mins: Vec<f64> = rows.iter().filter_map(|r| r.salario_min).collect();
    let maxs: Vec<f64> = rows.iter().filter_map(|r| r.salario_max).collect();
    let contracts = value_counts(rows.iter().filter_map(|r| r.tipo_contrato.as_deref()));
    SummaryStats {
        total_vacancies: rows.len(),
        departments_count: rows
            .iter()
            .filter_map(|r| r.departamento.as_deref())
            .unique()
            .count(),
        avg_salary_min: mean(&mins),
        avg_salary_max: mean(&maxs),
        most_common_contract: contracts.first().map(|(name, _)| name.clone()),
    }
}

pub fn write_summary(stats: &SummaryStats, out_dir: &Path) -> Result<(), Box<dyn Error>> {
    let file = File::create(out_dir.join("summary_stats.json"))?;
    serde_json::to_writer_pretty(file, stats)?;
    Ok(())
}

/// Top 10 departments by vacancy count, horizontal bars.
pub fn department_chart(rows: &[VacancyRow], out_dir: &Path) {
    let counts: Vec<(String, usize)> =
        value_counts(rows.iter().filter_map(|r| r.departamento.as_deref()))
            .into_iter()
            .take(10)
            .collect();
    // plotly stacks horizontal bars bottom-up, reverse so the largest is on top
    let values: Vec<usize> = counts.iter().rev().map(|&(_, n)| n).collect();
    let names: Vec<String> = counts.iter().rev().map(|(name, _)| name.clone()).collect();

    let mut plot = Plot::new();
    plot.add_trace(Bar::new(values, names).orientation(Orientation::Horizontal));
    plot.set_layout(
        Layout::new()
            .title(Title::with_text("Top 10 Departments by Number of Vacancies"))
            .width(1200)
            .height(600),
    );
    write_chart(&plot, out_dir, "vacancies_by_department", 1200, 600);
}

/// Distribution of minimum salaries, 30 equal-width bins over the observed
/// range.  Nulls are excluded.
pub fn salary_histogram(rows: &[VacancyRow], out_dir: &Path) {
    let values: Vec<f64> = rows.iter().filter_map(|r| r.salario_min).collect();
    let lo = values.iter().cloned().reduce(f64::min);
    let hi = values.iter().cloned().reduce(f64::max);

    let mut hist = Histogram::new(values);
    if let (Some(lo), Some(hi)) = (lo, hi) {
        if hi > lo {
            hist = hist.x_bins(Bins::new(lo, hi, (hi - lo) / 30.0));
        }
    }
    let mut plot = Plot::new();
    plot.add_trace(hist);
    plot.set_layout(
        Layout::new()
            .title(Title::with_text("Distribution of Minimum Salaries"))
            .width(1000)
            .height(600),
    );
    write_chart(&plot, out_dir, "salary_distribution", 1000, 600);
}

/// Vacancy counts per contract type, horizontal bars.
pub fn contract_chart(rows: &[VacancyRow], out_dir: &Path) {
    let counts = value_counts(rows.iter().filter_map(|r| r.tipo_contrato.as_deref()));
    let values: Vec<usize> = counts.iter().rev().map(|&(_, n)| n).collect();
    let names: Vec<String> = counts.iter().rev().map(|(name, _)| name.clone()).collect();

    let mut plot = Plot::new();
    plot.add_trace(Bar::new(values, names).orientation(Orientation::Horizontal));
    plot.set_layout(
        Layout::new()
            .title(Title::with_text("Distribution of Contract Types"))
            .width(1000)
            .height(600),
    );
    write_chart(&plot, out_dir, "contract_types", 1000, 600);
}

#[cfg(feature = "kaleido")]
fn write_chart(plot: &Plot, out_dir: &Path, stem: &str, width: usize, height: usize) {
    use plotly::ImageFormat;
    plot.write_image(
        out_dir.join(format!("{}.png", stem)),
        ImageFormat::PNG,
        width,
        height,
        1.0,
    );
}

#[cfg(not(feature = "kaleido"))]
fn write_chart(plot: &Plot, out_dir: &Path, stem: &str, _width: usize, _height: usize) {
    plot.write_html(out_dir.join(format!("{}.html", stem)));
}

fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        None
    } else {
        Some(xs.iter().sum::<f64>() / xs.len() as f64)
    }
}
