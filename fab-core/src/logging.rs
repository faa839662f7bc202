use std::path::PathBuf;

const DEFAULT_LOG_DIR: &str = "/var/log/fab-station";

fn log_dir() -> PathBuf {
    std::env::var_os("FAB_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR))
}

pub fn init() {
    use env_logger::Target;
    use std::fs;
    use std::io;

    // Keep a per-station log next to the line's other records. If we cannot
    // create the file (permissions, readonly FS, etc.), fall back to stderr.
    let target = (|| -> io::Result<Target> {
        let dir = log_dir();
        fs::create_dir_all(&dir)?;
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("station.log"))?;
        Ok(Target::Pipe(Box::new(file)))
    })()
    .unwrap_or(Target::Stderr);

    env_logger::Builder::new()
        .target(target)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
