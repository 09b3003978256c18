pub mod encoder;
pub use encoder::{decode_for_url, encode_for_url};

use crate::core::visualization::DeadlockAnalysis;
use anyhow::{Context, Result};

/// Build the viewer URL carrying an encoded analysis
///
/// # Errors
/// Returns an error if the analysis could not be encoded
pub fn showcase_url(analysis: &DeadlockAnalysis, viewer_url: &str) -> Result<String> {
    let encoded = encode_for_url(analysis).context("Failed to encode analysis for URL")?;
    let separator = if viewer_url.contains('?') { '&' } else { '?' };
    Ok(format!("{viewer_url}{separator}analysis={encoded}"))
}

/// Showcase an analysis by sending it to a web viewer
///
/// The analysis is packed into the URL itself, so the viewer needs no
/// server-side storage.
///
/// # Arguments
/// * `analysis` - The analysis to display
/// * `viewer_url` - Base URL of the viewer
///
/// # Errors
/// Returns an error if:
/// - Failed to encode the analysis
/// - Failed to open the browser
///
/// # Example
///
/// ```no_run
/// use lockscope::{Analyzer, showcase};
///
/// let analysis = Analyzer::new()
///     .analyze_text(&std::fs::read_to_string("deadlock.log").unwrap())
///     .expect("no deadlock in log");
/// showcase(&analysis, "http://localhost:5173/").expect("Failed to open viewer");
/// ```
pub fn showcase(analysis: &DeadlockAnalysis, viewer_url: &str) -> Result<()> {
    let url = showcase_url(analysis, viewer_url)?;

    // Open the URL in the default web browser.
    webbrowser::open(&url).context("Failed to open browser")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Analyzer;

    #[test]
    fn test_showcase_url_appends_parameter() -> Result<()> {
        let analysis = Analyzer::new().analyze_text(
            "Process 1 waits for ExclusiveLock on relation a; blocked by process 2.\n\
Process 1: LOCK TABLE b\n\
Process 2 waits for ExclusiveLock on relation b; blocked by process 1.\n\
Process 2: LOCK TABLE a",
        )?;

        let plain = showcase_url(&analysis, "https://viewer.example/")?;
        assert!(plain.starts_with("https://viewer.example/?analysis="));

        let with_query = showcase_url(&analysis, "https://viewer.example/?theme=dark")?;
        assert!(with_query.starts_with("https://viewer.example/?theme=dark&analysis="));

        let encoded = plain.split_once("analysis=").map(|(_, e)| e).unwrap();
        assert_eq!(decode_for_url(encoded)?, analysis);
        Ok(())
    }
}
