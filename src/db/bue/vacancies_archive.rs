use duckdb::Connection;
use jiff::civil::{Date, DateTime};
use jiff::Zoned;
use lazy_static::lazy_static;
use log::info;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

/// Mis-encoded byte sequences seen in the BuE feed, with their repaired
/// characters.  Only these two are fixed; any other corruption passes through.
const ENCODING_FIXES: [(&str, &str); 2] = [("Ã³", "ó"), ("Ã­", "í")];

/// Column order of the `job_vacancies` table.  Extra passthrough columns from
/// the feed are appended after these, in sorted name order.
const BASE_COLUMNS: [&str; 10] = [
    "TITULO_VACANTE",
    "DESCRIPCION_VACANTE",
    "CARGO",
    "DEPARTAMENTO",
    "TIPO_CONTRATO",
    "RANGO_SALARIAL",
    "FECHA_PUBLICACION",
    "FECHA_VENCIMIENTO",
    "SALARIO_MIN",
    "SALARIO_MAX",
];

/// Formats tried, in order, when parsing the feed's date fields.
const DATE_FORMATS: [&str; 5] = [
    "%Y-%m-%d",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%d/%m/%Y",
    "%Y/%m/%d",
];

lazy_static! {
    static ref SALARY_MIN_RE: Regex = Regex::new(r"\$(\d+\.?\d*)").unwrap();
    static ref SALARY_RANGE_RE: Regex =
        Regex::new(r"\$(\d+\.?\d*)\s*-\s*\$(\d+\.?\d*)").unwrap();
}

/// One vacancy as delivered by the API.  Fields the pipeline works with are
/// typed; everything else is kept in `extra` and passed through to the
/// database unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVacancy {
    #[serde(rename = "TITULO_VACANTE")]
    pub titulo_vacante: Option<String>,
    #[serde(rename = "DESCRIPCION_VACANTE")]
    pub descripcion_vacante: Option<String>,
    #[serde(rename = "CARGO")]
    pub cargo: Option<String>,
    #[serde(rename = "DEPARTAMENTO")]
    pub departamento: Option<String>,
    #[serde(rename = "TIPO_CONTRATO")]
    pub tipo_contrato: Option<String>,
    #[serde(rename = "RANGO_SALARIAL")]
    pub rango_salarial: Option<String>,
    #[serde(rename = "FECHA_PUBLICACION")]
    pub fecha_publicacion: Option<String>,
    #[serde(rename = "FECHA_VENCIMIENTO")]
    pub fecha_vencimiento: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One processed vacancy.  Same count and order as the raw fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VacancyRow {
    pub titulo_vacante: Option<String>,
    pub descripcion_vacante: Option<String>,
    pub cargo: Option<String>,
    pub departamento: Option<String>,
    pub tipo_contrato: Option<String>,
    pub rango_salarial: Option<String>,
    pub fecha_publicacion: Option<Date>,
    pub fecha_vencimiento: Option<Date>,
    pub salario_min: Option<f64>,
    pub salario_max: Option<f64>,
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    resultados: Vec<RawVacancy>,
}

pub struct BueVacanciesArchive {
    pub api_url: String,
    pub base_dir: String,
    pub duckdb_path: String,
    pub analysis_dir: String,
}

impl BueVacanciesArchive {
    /// One GET against the vacancies endpoint.  Errors on transport failure,
    /// a non-2xx status, a malformed body, or a missing `resultados` key.
    pub fn fetch_vacancies(&self) -> Result<Vec<RawVacancy>, Box<dyn Error>> {
        info!("fetching vacancies from {}", self.api_url);
        let resp = reqwest::blocking::get(&self.api_url)?.error_for_status()?;
        let body = resp.text()?;
        parse_envelope(&body)
    }

    /// Staging file for the DuckDB upload.
    fn staging_filename(&self) -> PathBuf {
        Path::new(&self.base_dir)
            .join("tmp")
            .join(format!("job_vacancies_{}.csv", Zoned::now().date()))
    }

    fn write_staging_csv(
        &self,
        rows: &[VacancyRow],
        extras: &[String],
    ) -> Result<PathBuf, Box<dyn Error>> {
        let path = self.staging_filename();
        fs::create_dir_all(path.parent().unwrap())?;
        let mut wtr = csv::Writer::from_path(&path)?;

        let mut header: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
        header.extend(extras.iter().cloned());
        wtr.write_record(&header)?;

        for row in rows {
            let mut record: Vec<String> = vec![
                row.titulo_vacante.clone().unwrap_or_default(),
                row.descripcion_vacante.clone().unwrap_or_default(),
                row.cargo.clone().unwrap_or_default(),
                row.departamento.clone().unwrap_or_default(),
                row.tipo_contrato.clone().unwrap_or_default(),
                row.rango_salarial.clone().unwrap_or_default(),
                row.fecha_publicacion.map(|d| d.to_string()).unwrap_or_default(),
                row.fecha_vencimiento.map(|d| d.to_string()).unwrap_or_default(),
                row.salario_min.map(|v| v.to_string()).unwrap_or_default(),
                row.salario_max.map(|v| v.to_string()).unwrap_or_default(),
            ];
            for col in extras {
                record.push(match row.extra.get(col) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(v) => v.to_string(),
                });
            }
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(path)
    }

    /// Replace the `job_vacancies` table with these rows and recreate the
    /// three lookup indexes.  Prior contents and indexes are dropped with the
    /// table.  Returns the row count read back from the table.
    pub fn update_duckdb(&self, rows: &[VacancyRow]) -> Result<usize, Box<dyn Error>> {
        let extras = extra_columns(rows);
        let staging = self.write_staging_csv(rows, &extras)?;
        if let Some(dir) = Path::new(&self.duckdb_path).parent() {
            fs::create_dir_all(dir)?;
        }

        let mut columns: Vec<String> = BASE_COLUMNS
            .iter()
            .map(|c| format!("'{}': '{}'", c, column_type(c)))
            .collect();
        columns.extend(extras.iter().map(|c| format!("'{}': 'VARCHAR'", c)));

        info!(
            "inserting {} vacancies into {} ...",
            rows.len(),
            self.duckdb_path
        );
        let sql = format!(
            r"
CREATE OR REPLACE TABLE job_vacancies AS
SELECT * FROM read_csv('{}', header = true, columns = {{{}}});
CREATE INDEX idx_departamento ON job_vacancies(DEPARTAMENTO);
CREATE INDEX idx_fecha_publicacion ON job_vacancies(FECHA_PUBLICACION);
CREATE INDEX idx_cargo ON job_vacancies(CARGO);
",
            staging.display(),
            columns.join(", ")
        );
        let conn = Connection::open(self.duckdb_path.clone())?;
        conn.execute_batch(&sql)?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM job_vacancies", [], |row| row.get(0))?;
        let _ = conn.close();
        Ok(n as usize)
    }
}

/// Pull the `resultados` array out of a response body.
pub fn parse_envelope(body: &str) -> Result<Vec<RawVacancy>, Box<dyn Error>> {
    let envelope: Envelope = serde_json::from_str(body)?;
    Ok(envelope.resultados)
}

/// Transform raw vacancies into processed rows.  The output has the same
/// length and order as the input; no row is ever dropped.  An unparseable
/// date fails the whole run, an unmatched salary pattern only nulls the
/// salary fields.
pub fn process_vacancies(vacancies: Vec<RawVacancy>) -> Result<Vec<VacancyRow>, Box<dyn Error>> {
    let mut rows: Vec<VacancyRow> = Vec::with_capacity(vacancies.len());
    for v in vacancies {
        let fecha_publicacion = match &v.fecha_publicacion {
            Some(s) => Some(parse_date(s)?),
            None => None,
        };
        let fecha_vencimiento = match &v.fecha_vencimiento {
            Some(s) => Some(parse_date(s)?),
            None => None,
        };
        let (salario_min, salario_max) = match &v.rango_salarial {
            Some(s) => extract_salary_range(s),
            None => (None, None),
        };
        rows.push(VacancyRow {
            titulo_vacante: v.titulo_vacante.as_deref().map(repair_text),
            descripcion_vacante: v.descripcion_vacante.as_deref().map(repair_text),
            cargo: v.cargo.as_deref().map(repair_text),
            departamento: v.departamento,
            tipo_contrato: v.tipo_contrato,
            rango_salarial: v.rango_salarial,
            fecha_publicacion,
            fecha_vencimiento,
            salario_min,
            salario_max,
            extra: v.extra,
        });
    }
    Ok(rows)
}

/// Parse a date string by trying each known format in order.
pub fn parse_date(s: &str) -> Result<Date, Box<dyn Error>> {
    for fmt in DATE_FORMATS {
        if fmt.contains("%H") {
            if let Ok(dt) = DateTime::strptime(fmt, s) {
                return Ok(dt.date());
            }
        } else if let Ok(d) = Date::strptime(fmt, s) {
            return Ok(d);
        }
    }
    Err(format!("Failed to parse '{}' as a date", s).into())
}

/// Extract (min, max) salary from a free-text range like
/// `"$1200.00 - $1800.00"`.  A single amount yields only the min.
pub fn extract_salary_range(rango: &str) -> (Option<f64>, Option<f64>) {
    let min: Option<f64> = SALARY_MIN_RE
        .captures(rango)
        .and_then(|c| c[1].parse().ok());
    let max: Option<f64> = SALARY_RANGE_RE
        .captures(rango)
        .and_then(|c| c[2].parse().ok());
    (min, max)
}

/// Apply the fixed substitution table to one text field.
pub fn repair_text(s: &str) -> String {
    let mut out = s.to_string();
    for (bad, good) in ENCODING_FIXES {
        if out.contains(bad) {
            out = out.replace(bad, good);
        }
    }
    out
}

fn column_type(column: &str) -> &'static str {
    match column {
        "FECHA_PUBLICACION" | "FECHA_VENCIMIENTO" => "DATE",
        "SALARIO_MIN" | "SALARIO_MAX" => "DOUBLE",
        _ => "VARCHAR",
    }
}

/// Union of the passthrough field names across all rows, sorted.
fn extra_columns(rows: &[VacancyRow]) -> Vec<String> {
    let mut columns: BTreeSet<String> = BTreeSet::new();
    for row in rows {
        for key in row.extra.keys() {
            columns.insert(key.clone());
        }
    }
    columns.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use crate::db::prod_db::ProdDb;

    use super::*;

    fn test_archive(name: &str) -> BueVacanciesArchive {
        let dir = std::env::temp_dir().join(format!("empleo_{}_{}", name, std::process::id()));
        BueVacanciesArchive {
            api_url: "http://localhost:9/unused".to_string(),
            base_dir: dir.join("archive").to_string_lossy().into_owned(),
            duckdb_path: dir.join("bue.duckdb").to_string_lossy().into_owned(),
            analysis_dir: dir.join("analysis").to_string_lossy().into_owned(),
        }
    }

    fn raw(titulo: &str, rango: Option<&str>, fecha: Option<&str>) -> RawVacancy {
        RawVacancy {
            titulo_vacante: Some(titulo.to_string()),
            rango_salarial: rango.map(|s| s.to_string()),
            fecha_publicacion: fecha.map(|s| s.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn parse_envelope_ok() -> Result<(), Box<dyn Error>> {
        let body = r#"{"resultados": [
            {"TITULO_VACANTE": "Vendedor", "DEPARTAMENTO": "Antioquia", "CODIGO": 17},
            {"TITULO_VACANTE": "Cajero", "DEPARTAMENTO": "Bolívar"}
        ]}"#;
        let vacancies = parse_envelope(body)?;
        assert_eq!(vacancies.len(), 2);
        assert_eq!(vacancies[0].titulo_vacante.as_deref(), Some("Vendedor"));
        assert_eq!(
            vacancies[0].extra.get("CODIGO"),
            Some(&serde_json::json!(17))
        );
        Ok(())
    }

    #[test]
    fn parse_envelope_missing_key() {
        let body = r#"{"error": "no results"}"#;
        assert!(parse_envelope(body).is_err());
    }

    #[test]
    fn salary_extraction() {
        assert_eq!(
            extract_salary_range("$1200.00 - $1800.00"),
            (Some(1200.0), Some(1800.0))
        );
        assert_eq!(extract_salary_range("$1500.00"), (Some(1500.0), None));
        assert_eq!(extract_salary_range("A convenir"), (None, None));
    }

    #[test]
    fn encoding_repair() {
        assert_eq!(
            repair_text("Operario de producciÃ³n"),
            "Operario de producción"
        );
        assert_eq!(repair_text("TÃ­tulo"), "Título");
        assert_eq!(repair_text("Conductor"), "Conductor");
    }

    #[test]
    fn date_formats() -> Result<(), Box<dyn Error>> {
        assert_eq!(parse_date("2024-03-15")?, Date::new(2024, 3, 15)?);
        assert_eq!(parse_date("2024-03-15T08:30:00")?, Date::new(2024, 3, 15)?);
        assert_eq!(parse_date("2024-03-15 08:30:00")?, Date::new(2024, 3, 15)?);
        assert_eq!(parse_date("15/03/2024")?, Date::new(2024, 3, 15)?);
        assert!(parse_date("pronto").is_err());
        Ok(())
    }

    #[test]
    fn process_keeps_count_and_order() -> Result<(), Box<dyn Error>> {
        let vacancies = vec![
            raw("Vendedor", Some("$1200.00 - $1800.00"), Some("2024-03-15")),
            raw("Cajero", Some("$1500.00"), None),
            raw("Operario", None, Some("2024-04-01")),
        ];
        let rows = process_vacancies(vacancies)?;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].titulo_vacante.as_deref(), Some("Vendedor"));
        assert_eq!(rows[0].salario_min, Some(1200.0));
        assert_eq!(rows[0].salario_max, Some(1800.0));
        assert_eq!(rows[1].titulo_vacante.as_deref(), Some("Cajero"));
        assert_eq!(rows[1].salario_min, Some(1500.0));
        assert_eq!(rows[1].salario_max, None);
        assert_eq!(rows[2].titulo_vacante.as_deref(), Some("Operario"));
        assert_eq!(rows[2].salario_min, None);
        assert_eq!(rows[2].fecha_publicacion, Some(Date::new(2024, 4, 1)?));
        Ok(())
    }

    #[test]
    fn process_fails_on_bad_date() {
        let vacancies = vec![raw("Vendedor", None, Some("no es una fecha"))];
        assert!(process_vacancies(vacancies).is_err());
    }

    #[test]
    fn update_duckdb_replaces_table() -> Result<(), Box<dyn Error>> {
        let archive = test_archive("replace");
        let _ = std::fs::remove_file(&archive.duckdb_path);

        let first = process_vacancies(vec![
            raw("Vendedor", Some("$1200.00 - $1800.00"), Some("2024-03-15")),
            raw("Cajero", Some("$1500.00"), Some("2024-03-16")),
            raw("Operario", None, None),
        ])?;
        assert_eq!(archive.update_duckdb(&first)?, 3);

        // a second run fully replaces the table, no accumulation
        let second = process_vacancies(vec![
            raw("Conductor", Some("$900.00"), Some("2024-05-01")),
            raw("Auxiliar", None, Some("2024-05-02")),
        ])?;
        assert_eq!(archive.update_duckdb(&second)?, 2);

        let conn = Connection::open(archive.duckdb_path.clone())?;
        let titulo: String = conn.query_row(
            "SELECT TITULO_VACANTE FROM job_vacancies ORDER BY FECHA_PUBLICACION LIMIT 1",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(titulo, "Conductor");
        Ok(())
    }

    #[test]
    fn update_duckdb_empty_table() -> Result<(), Box<dyn Error>> {
        let archive = test_archive("empty");
        let _ = std::fs::remove_file(&archive.duckdb_path);
        assert_eq!(archive.update_duckdb(&[])?, 0);
        Ok(())
    }

    #[ignore]
    #[test]
    fn fetch_vacancies() -> Result<(), Box<dyn Error>> {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();
        let archive = ProdDb::bue_vacancies();
        let vacancies = archive.fetch_vacancies()?;
        assert!(!vacancies.is_empty());
        Ok(())
    }
}
