pub mod activity;
pub mod budget_line;
pub mod dossier;
pub mod stage;
pub mod step;
