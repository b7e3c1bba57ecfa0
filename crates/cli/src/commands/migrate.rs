use crate::commands::{
    connect_and_migrate, finish, load_config, runtime, CommandResult, StepError,
};

pub fn run() -> CommandResult {
    let config = match load_config("migrate") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("migrate") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_and_migrate(&config).await?;
        pool.close().await;
        Ok::<_, StepError>(CommandResult::success("migrate", "applied pending migrations"))
    });
    finish("migrate", result)
}
