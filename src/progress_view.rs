use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ytmp3::ProgressEvent;

/// 终端进度显示：播放列表时额外显示一条总进度
pub struct DownloadProgressView {
    multi: MultiProgress,
    song: ProgressBar,
    overall: Option<ProgressBar>,
}

impl DownloadProgressView {
    pub fn new() -> Self {
        let multi = MultiProgress::new();
        let song = multi.add(ProgressBar::new(1000));
        song.set_style(bar_style("{spinner:.green} {msg} [{bar:40.cyan/blue}] {percent}%"));
        Self {
            multi,
            song,
            overall: None,
        }
    }

    pub fn update(&mut self, event: &ProgressEvent) {
        if let (Some(current), Some(total)) = (event.current_song, event.total_songs) {
            let overall = self.overall.get_or_insert_with(|| {
                let bar = self.multi.insert(0, ProgressBar::new(1000));
                bar.set_style(bar_style("{msg} [{elapsed_precise}] [{wide_bar:.green}] {percent}%"));
                bar
            });
            overall.set_position(permille(event.overall_progress));
            overall.set_message(format!("第 {}/{} 首", current, total));
        }

        self.song.set_position(permille(event.song_progress));
        let label = match &event.current_title {
            Some(title) => format!("{} {}", event.status, title),
            None => event.status.clone(),
        };
        self.song.set_message(label);
    }

    pub fn finish(self) {
        self.song.finish_and_clear();
        if let Some(overall) = self.overall {
            overall.finish_and_clear();
        }
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

fn permille(percent: f64) -> u64 {
    (percent.clamp(0.0, 100.0) * 10.0).round() as u64
}
