//! 疑似端末越しにバイナリを動かし、raw モード切り替え時の入力の扱いを確かめる。

use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::io::FromRawFd;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

struct Pty {
    master: File,
    slave: File,
}

fn open_pty() -> Pty {
    let mut master = 0;
    let mut slave = 0;
    let ret = unsafe {
        libc::openpty(
            &mut master,
            &mut slave,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };
    assert_eq!(ret, 0, "openpty: {}", std::io::Error::last_os_error());
    unsafe {
        Pty {
            master: File::from_raw_fd(master),
            slave: File::from_raw_fd(slave),
        }
    }
}

/// 端末側の出力を読み続けるスレッドを立てる。
fn spawn_reader(mut master: File) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = [0u8; 1024];
        loop {
            match master.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// `needle` が現れるまで出力を溜める。時間切れなら `false`。
fn wait_for(rx: &Receiver<Vec<u8>>, seen: &mut Vec<u8>, needle: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if String::from_utf8_lossy(seen).contains(needle) {
            return true;
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return false;
        }
        match rx.recv_timeout(left) {
            Ok(chunk) => seen.extend_from_slice(&chunk),
            Err(_) => return false,
        }
    }
}

fn spawn_on_pty(pty: &Pty) -> Child {
    let stdio = || Stdio::from(pty.slave.try_clone().unwrap());
    Command::new(env!("CARGO_BIN_EXE_tish"))
        .env_remove("HISTFILE")
        .env_remove("TISH_LOG")
        .stdin(stdio())
        .stdout(stdio())
        .stderr(stdio())
        .spawn()
        .unwrap()
}

fn finish(mut child: Child) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if child.try_wait().unwrap().is_some() {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn typed_ahead_line_runs_after_command() {
    let pty = open_pty();
    let child = spawn_on_pty(&pty);
    let mut master = pty.master.try_clone().unwrap();
    let rx = spawn_reader(pty.master);
    drop(pty.slave);

    let mut seen = Vec::new();
    assert!(wait_for(&rx, &mut seen, "$ ", Duration::from_secs(10)));

    master.write_all(b"sleep 1\r").unwrap();
    // sleep の実行中（cooked モード）に次の行を打ち込んでおく
    thread::sleep(Duration::from_millis(300));
    master.write_all(b"echo TYPED_AHEAD\r").unwrap();

    let ran = wait_for(&rx, &mut seen, "\r\nTYPED_AHEAD\r\n", Duration::from_secs(10));

    master.write_all(b"exit\r").unwrap();
    finish(child);

    assert!(ran, "typed-ahead line was lost: {:?}", String::from_utf8_lossy(&seen));
}
