// Steps du moteur de migrations
pub mod migration_steps;
