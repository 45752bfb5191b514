//! Headless entry point.

fn main() {
    env_logger::init();
    log::info!("Starting Tessera");

    let summary = tessera_app::AppConfig::from_args(std::env::args().skip(1))
        .and_then(tessera_app::App::run);
    match summary {
        Ok(summary) => log::info!(
            "{} elements, {} selected, scale {:.3}, {} draws",
            summary.elements,
            summary.selected,
            summary.scale,
            summary.stats.draws
        ),
        Err(err) => {
            log::error!("{err}");
            std::process::exit(1);
        }
    }
}
