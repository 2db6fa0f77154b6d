use std::env;

use crate::db::bue::vacancies_archive::BueVacanciesArchive;

pub struct ProdDb {}

impl ProdDb {
    /// Production wiring for the vacancies pipeline.  Every location can be
    /// overridden through the environment so tests and one-off runs don't
    /// touch the production paths.
    pub fn bue_vacancies() -> BueVacanciesArchive {
        BueVacanciesArchive {
            api_url: env::var("BUE_API_URL").unwrap_or_else(|_| {
                "https://www.buscadordeempleo.gov.co/backbue/v1//vacantes/resultados".to_string()
            }),
            base_dir: env::var("BUE_BASE_DIR").unwrap_or_else(|_| "archive/bue".to_string()),
            duckdb_path: env::var("BUE_DUCKDB_PATH")
                .unwrap_or_else(|_| "archive/duckdb/bue.duckdb".to_string()),
            analysis_dir: env::var("BUE_ANALYSIS_DIR").unwrap_or_else(|_| "analysis".to_string()),
        }
    }
}
