pub mod vacancies_archive;
