use sea_orm_migration::prelude::*;

mod m20260210_initial;
mod m20260215_add_history_index;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260210_initial::Migration),
            Box::new(m20260215_add_history_index::Migration),
        ]
    }
}
