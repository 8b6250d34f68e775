#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    palisade_common::cli::run_app_with_cli_and_config::<palisade::config::Config>(
        palisade::APP_NAME,
        palisade::APP_VERSION,
        palisade::run,
        None,
    )
}
