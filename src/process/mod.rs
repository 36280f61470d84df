//! 子进程启动与输出采集
//!
//! stdout 和 stderr 各有一个读取任务，按到达顺序合并到同一个通道里，
//! 调用方逐行消费。这里不解释任何工具特有的输出格式，也不做超时控制。

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub const DEFAULT_TAIL_LINES: usize = 40;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("无法启动 {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("等待子进程失败: {0}")]
    Wait(#[from] std::io::Error),
}

/// 要执行的命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// 进程退出结果，附带最后若干行输出用于诊断
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub success: bool,
    pub tail: Vec<String>,
}

impl ProcessExit {
    pub fn tail_text(&self) -> String {
        self.tail.join("\n")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessRunner {
    tail_lines: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TAIL_LINES)
    }
}

impl ProcessRunner {
    pub fn new(tail_lines: usize) -> Self {
        Self { tail_lines }
    }

    pub fn spawn(&self, spec: &CommandSpec) -> Result<RunningProcess, ProcessError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            // 独立进程组，终止时连同它启动的进程一起结束
            command.process_group(0);
        }
        #[cfg(windows)]
        {
            // CREATE_NO_WINDOW
            command.creation_flags(0x0800_0000);
        }

        debug!("启动子进程: {:?} {:?}", spec.program, spec.args);
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(stdout, OutputStream::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(stderr, OutputStream::Stderr, tx)));
        }

        Ok(RunningProcess {
            child,
            lines: rx,
            readers,
            tail: VecDeque::with_capacity(self.tail_lines),
            tail_lines: self.tail_lines,
        })
    }

    /// 运行到结束，适合版本查询这类短命令
    pub async fn run_to_completion(&self, spec: &CommandSpec) -> Result<ProcessExit, ProcessError> {
        let mut process = self.spawn(spec)?;
        process.wait().await
    }
}

pub struct RunningProcess {
    child: Child,
    lines: mpsc::UnboundedReceiver<OutputLine>,
    readers: Vec<JoinHandle<()>>,
    tail: VecDeque<String>,
    tail_lines: usize,
}

impl RunningProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// 下一行输出；两个输出流都关闭后返回 `None`
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        let line = self.lines.recv().await?;
        if self.tail_lines > 0 {
            if self.tail.len() == self.tail_lines {
                self.tail.pop_front();
            }
            self.tail.push_back(line.text.clone());
        }
        Some(line)
    }

    /// 读完剩余输出并等待退出
    pub async fn wait(&mut self) -> Result<ProcessExit, ProcessError> {
        while self.next_line().await.is_some() {}
        let status = self.child.wait().await?;
        for reader in self.readers.drain(..) {
            let _ = reader.await;
        }
        Ok(ProcessExit {
            code: status.code(),
            success: status.success(),
            tail: std::mem::take(&mut self.tail).into(),
        })
    }

    /// 终止子进程及其启动的所有进程，然后回收
    pub async fn kill(&mut self) -> Result<(), ProcessError> {
        if let Some(pid) = self.child.id() {
            kill_process_tree(pid).await;
        }
        if let Err(e) = self.child.start_kill() {
            debug!("子进程已经退出: {}", e);
        }
        self.child.wait().await?;
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        Ok(())
    }
}

/// 结束整个进程树。失败只记录日志，随后仍会直接终止子进程本身。
async fn kill_process_tree(pid: u32) {
    #[cfg(unix)]
    let mut command = {
        // 子进程以自己的 pid 作为进程组号
        let mut command = Command::new("sh");
        command.arg("-c").arg(format!("kill -9 -{}", pid));
        command
    };
    #[cfg(windows)]
    let mut command = {
        let mut command = Command::new("taskkill");
        command.args(["/PID", &pid.to_string(), "/T", "/F"]);
        command.creation_flags(0x0800_0000);
        command
    };

    let status = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(status) if status.success() => debug!("已终止进程树 {}", pid),
        Ok(status) => debug!("终止进程树 {} 返回 {}", pid, status),
        Err(e) => debug!("无法终止进程树 {}: {}", pid, e),
    }
}

async fn pump<R>(reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // 没有 --newline 时进度条用 \r 覆盖同一行
                for segment in decode_line(&buf).split('\r') {
                    let text = segment.trim_end_matches('\n');
                    if text.trim().is_empty() {
                        continue;
                    }
                    let line = OutputLine {
                        stream,
                        text: text.to_string(),
                    };
                    if tx.send(line).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                debug!("读取 {:?} 失败: {}", stream, e);
                break;
            }
        }
    }
}

/// 优先按 UTF-8 解码，失败时猜测编码（Windows 控制台常见 GBK）
fn decode_line(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let mut detector = chardetng::EncodingDetector::new();
            detector.feed(bytes, true);
            let encoding = detector.guess(None, true);
            let (text, _, _) = encoding.decode(bytes);
            text.into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_non_utf8_output() {
        assert_eq!(decode_line(b"[download] 10%\n"), "[download] 10%\n");
        // "下载" in GBK
        let gbk = [0xCF, 0xC2, 0xD4, 0xD8];
        assert!(!decode_line(&gbk).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn merges_both_streams_and_keeps_tail() {
        let spec = CommandSpec::new("/bin/sh")
            .arg("-c")
            .arg("echo one; echo two 1>&2; echo three; exit 3");
        let mut process = ProcessRunner::new(2).spawn(&spec).unwrap();

        let mut seen = Vec::new();
        while let Some(line) = process.next_line().await {
            seen.push(line.text);
        }
        seen.sort();
        assert_eq!(seen, vec!["one", "three", "two"]);

        let exit = process.wait().await.unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(!exit.success);
        assert_eq!(exit.tail.len(), 2);
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let spec = CommandSpec::new("/definitely/not/here/yt-dlp");
        assert!(matches!(
            ProcessRunner::default().spawn(&spec),
            Err(ProcessError::Spawn { .. })
        ));
    }

    /// 进程仍在运行，僵尸进程不算
    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
            return false;
        };
        let state = stat.rsplit(')').next().and_then(|rest| rest.trim_start().chars().next());
        !matches!(state, Some('Z') | Some('X') | None)
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn kill_takes_down_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("helper.pid");
        let spec = CommandSpec::new("/bin/sh").arg("-c").arg(format!(
            "sh -c 'echo $$ > \"$1\"; exec sleep 30' sh '{}' & \
             while [ ! -s '{}' ]; do sleep 0.05; done; echo ready; wait",
            pid_file.display(),
            pid_file.display()
        ));
        let mut process = ProcessRunner::default().spawn(&spec).unwrap();
        assert_eq!(process.next_line().await.unwrap().text, "ready");

        let helper: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        assert!(is_running(helper));

        process.kill().await.unwrap();
        for _ in 0..100 {
            if !is_running(helper) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        panic!("子进程启动的进程 {} 在终止后仍在运行", helper);
    }
}
