use tenantshop::logging::{self, LogSettings};

#[rocket::main]
async fn main() {
    let guard = match LogSettings::from_env().and_then(|s| logging::init(&s)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("could not set up logging: {}", e);
            std::process::exit(1);
        }
    };
    slog::info!(slog_scope::logger(), "starting tenantshop"; "version" => env!("CARGO_PKG_VERSION"));

    if let Err(e) = tenantshop::rocket().launch().await {
        slog::crit!(slog_scope::logger(), "server stopped"; "error" => %e);
        drop(guard);
        std::process::exit(1);
    }
}
