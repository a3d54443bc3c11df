//! `fetchd stats` – aggregate statistics over all downloads.

use anyhow::Result;
use fetchd_core::stats::RunningStat;
use fetchd_core::store::Page;
use fetchd_core::Services;

pub async fn run_stats(services: &Services) -> Result<()> {
    let stats = services.downloads.stats(Page::all()).await?;
    println!("{:<16} {:>8} {:>14} {:>14} {:>14}", "", "COUNT", "MEAN", "MIN", "MAX");
    print_row("wait (ms)", &stats.wait_time_ms);
    print_row("download (ms)", &stats.download_time_ms);
    print_row("bytes", &stats.bytes_read);
    Ok(())
}

fn print_row(label: &str, s: &RunningStat) {
    println!(
        "{:<16} {:>8} {:>14.1} {:>14.1} {:>14.1}",
        label,
        s.count,
        s.mean(),
        s.min,
        s.max
    );
}
