use std::path::Path;

use serde::de::DeserializeOwned;

use relatedrec_core::domain::catalog::CatalogProduct;
use relatedrec_core::domain::customer::Customer;
use relatedrec_db::repositories::{
    CatalogRepository, CustomerRepository, SqlCatalogRepository, SqlCustomerRepository,
};

use crate::commands::{
    connect_and_migrate, finish, load_config, runtime, CommandResult, StepError,
};

/// Upserts one catalog product per non-blank line of `file`.
pub fn catalog(file: &Path) -> CommandResult {
    let command = "import-catalog";
    let products = match read_lines::<CatalogProduct>(file) {
        Ok(products) => products,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure(command, error_class, message, exit_code)
        }
    };
    let config = match load_config(command) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime(command) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_and_migrate(&config).await?;
        let repository = SqlCatalogRepository::new(pool.clone());
        let count = products.len();
        for product in products {
            repository
                .upsert(product)
                .await
                .map_err(|error| ("persistence", error.to_string(), 6u8))?;
        }
        pool.close().await;
        let message = format!("imported {count} catalog products");
        Ok::<_, StepError>(CommandResult::success(command, message))
    });
    finish(command, result)
}

/// Upserts one customer per non-blank line of `file`.
pub fn customers(file: &Path) -> CommandResult {
    let command = "import-customers";
    let customers = match read_lines::<Customer>(file) {
        Ok(customers) => customers,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure(command, error_class, message, exit_code)
        }
    };
    let config = match load_config(command) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime(command) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_and_migrate(&config).await?;
        let repository = SqlCustomerRepository::new(pool.clone());
        let count = customers.len();
        for customer in customers {
            repository
                .save(customer)
                .await
                .map_err(|error| ("persistence", error.to_string(), 6u8))?;
        }
        pool.close().await;
        Ok::<_, StepError>(CommandResult::success(command, format!("imported {count} customers")))
    });
    finish(command, result)
}

fn read_lines<T: DeserializeOwned>(file: &Path) -> Result<Vec<T>, StepError> {
    let raw = std::fs::read_to_string(file).map_err(|error| {
        ("invalid_input", format!("could not read `{}`: {error}", file.display()), 8u8)
    })?;

    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|error| {
                ("invalid_input", format!("line {}: {error}", index + 1), 8u8)
            })
        })
        .collect()
}
