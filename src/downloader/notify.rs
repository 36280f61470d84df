use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// 下载成功后的桌面通知，失败不影响下载结果
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str);
}

/// 不发送任何通知，用于测试和无界面环境
pub struct NullNotifier;

#[async_trait]
impl CompletionNotifier for NullNotifier {
    async fn notify(&self, _title: &str, _body: &str) {}
}

/// 调用系统自带的通知程序
pub struct DesktopNotifier;

#[async_trait]
impl CompletionNotifier for DesktopNotifier {
    async fn notify(&self, title: &str, body: &str) {
        let mut command = notification_command(title, body);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        match command.spawn() {
            Ok(mut child) => {
                // 不等待通知程序结束，只在后台回收
                tokio::spawn(async move {
                    if let Err(e) = child.wait().await {
                        debug!("通知进程异常: {}", e);
                    }
                });
            }
            Err(e) => warn!("发送桌面通知失败: {}", e),
        }
    }
}

fn notification_command(title: &str, body: &str) -> Command {
    if cfg!(target_os = "macos") {
        let script = format!(
            "display notification \"{}\" with title \"{}\"",
            escape_applescript(body),
            escape_applescript(title)
        );
        let mut command = Command::new("osascript");
        command.arg("-e").arg(script);
        command
    } else if cfg!(target_os = "windows") {
        let script = format!(
            "[Windows.UI.Notifications.ToastNotificationManager, Windows.UI.Notifications, ContentType = WindowsRuntime] > $null; \
             $xml = [Windows.UI.Notifications.ToastNotificationManager]::GetTemplateContent(1); \
             $text = $xml.GetElementsByTagName('text'); \
             $text.Item(0).AppendChild($xml.CreateTextNode('{}')) > $null; \
             $text.Item(1).AppendChild($xml.CreateTextNode('{}')) > $null; \
             [Windows.UI.Notifications.ToastNotificationManager]::CreateToastNotifier('ytmp3').Show([Windows.UI.Notifications.ToastNotification]::new($xml))",
            title.replace('\'', "''"),
            body.replace('\'', "''")
        );
        let mut command = Command::new("powershell");
        command.args(["-NoProfile", "-Command"]).arg(script);
        command
    } else {
        let mut command = Command::new("notify-send");
        command.arg("--app-name=ytmp3").arg(title).arg(body);
        command
    }
}

fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
