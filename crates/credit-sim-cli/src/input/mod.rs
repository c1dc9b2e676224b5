pub mod file;
pub mod stdin;

use serde::de::DeserializeOwned;

/// Load a request from `--input`, falling back to piped stdin.
pub fn read_request<T: DeserializeOwned>(
    path: Option<&str>,
    what: &str,
) -> Result<T, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        return file::read_request_file(path);
    }
    match stdin::read_stdin()? {
        Some(request) => Ok(request),
        None => Err(format!("--input <file.json> or stdin required for {what}").into()),
    }
}
