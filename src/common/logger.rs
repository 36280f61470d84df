use colored::*;

use crate::deps::Provenance;
use crate::engine::ToolStatus;
use crate::store::HistoryEntry;

/// 终端输出工具
pub struct PrettyLogger;

impl PrettyLogger {
    /// 显示成功消息
    pub fn success(message: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), message.as_ref());
    }

    /// 显示信息消息
    pub fn info(message: impl AsRef<str>) {
        println!("{} {}", "ℹ".blue().bold(), message.as_ref());
    }

    /// 显示警告消息
    pub fn warning(message: impl AsRef<str>) {
        println!("{} {}", "⚠".yellow().bold(), message.as_ref());
    }

    /// 显示错误消息，多行内容逐行缩进
    pub fn error(message: impl AsRef<str>) {
        let mut lines = message.as_ref().lines();
        println!("{} {}", "✗".red().bold(), lines.next().unwrap_or_default());
        for line in lines {
            println!("  {}", line.bright_black());
        }
    }

    /// 显示步骤开始
    pub fn step_start(step: impl AsRef<str>) {
        println!("\n{} {}", "▶".cyan().bold(), step.as_ref().bold());
    }

    pub fn file_info(label: impl AsRef<str>, path: impl AsRef<str>) {
        println!("{} {}: {}", "📁".blue().bold(), label.as_ref().bold(), path.as_ref());
    }

    /// 依赖检查结果
    pub fn tool_status(name: impl AsRef<str>, status: &ToolStatus) {
        if !status.present {
            println!("{} {} {}", "✗".red().bold(), name.as_ref().bold(), "未安装".red());
            return;
        }

        let source = match status.provenance {
            Some(Provenance::Configured) => "环境变量指定",
            Some(Provenance::FoundInPath) => "系统 PATH",
            Some(Provenance::Bootstrapped) => "自动安装",
            None => "未知来源",
        };
        println!(
            "{} {} {} ({})",
            "✓".green().bold(),
            name.as_ref().bold(),
            status.version.as_deref().unwrap_or("版本未知").cyan(),
            source.bright_black()
        );
        if let Some(path) = &status.path {
            println!("    {}", path.display().to_string().bright_black());
        }
        if let Some(error) = &status.error {
            println!("    {} {}", "⚠".yellow(), error);
        }
    }

    /// 一条历史记录
    pub fn history_entry(index: usize, entry: &HistoryEntry) {
        let title = entry
            .title
            .clone()
            .unwrap_or_else(|| entry.output_path.display().to_string());
        println!(
            "{:>3}. {} {} {}",
            index,
            title.bold(),
            format!("[{}]", entry.bitrate).cyan(),
            entry.timestamp.bright_black()
        );
        println!("     {}", entry.url.bright_black());
    }

    /// 显示分割线
    pub fn separator() {
        println!("{}", "─".repeat(50).bright_black());
    }

    /// 显示完成总结
    pub fn completion_summary(items: Vec<impl AsRef<str>>) {
        println!("\n{}", "🎉 下载完成！".green().bold());
        for item in items {
            println!("  {}", item.as_ref());
        }
    }
}

#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::success(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::info(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::warning(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::error(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_step {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::step_start(format!($($arg)*))
    };
}
