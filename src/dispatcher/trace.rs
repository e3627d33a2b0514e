//! 未処理の失敗に添えるトレースバック
//!
//! ハンドラーエラーは作成時点、パニックはパニックフックの中でバックトレースを
//! 取得するため、表示されるフレームは失敗した地点のものになる。

use std::cell::{Cell, RefCell};
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use crate::error::{Error, FaultTrace};

/// トレースバックに含めるフレーム数の上限
const TRACEBACK_FRAMES: usize = 10;

/// バックトレース取得やパニック処理そのもののフレーム
const MACHINERY_PREFIXES: [&str; 11] = [
    "std::",
    "core::",
    "alloc::",
    "<std::",
    "<core::",
    "<alloc::",
    "rust_begin_unwind",
    "__rust",
    "roost::error::",
    "<roost::error::",
    "roost::dispatcher::trace::",
];

static PANIC_HOOK: Once = Once::new();

thread_local! {
    static CAPTURING: Cell<bool> = Cell::new(false);
    static PANIC_TRACE: RefCell<Option<FaultTrace>> = RefCell::new(None);
}

/// 既存のフックを包んでパニック地点のバックトレースを記録するフックを登録する
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(FaultTrace::capture()));
            }
            previous(info);
        }));
    });
}

/// `f` を実行し、パニックした場合はその地点のバックトレースと共に返す
pub(crate) fn catch_unwind_traced<R>(
    f: impl FnOnce() -> R,
) -> Result<R, (Box<dyn std::any::Any + Send>, Option<FaultTrace>)> {
    install_panic_hook();
    PANIC_TRACE.with(|slot| slot.borrow_mut().take());
    let outer = CAPTURING.with(|flag| flag.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    CAPTURING.with(|flag| flag.set(outer));
    result.map_err(|payload| (payload, PANIC_TRACE.with(|slot| slot.borrow_mut().take())))
}

/// エラーの原因連鎖
pub(crate) fn error_chain(err: &Error) -> String {
    let mut chain = String::new();
    let mut source = StdError::source(err);
    while let Some(cause) = source {
        chain.push_str(&format!("Caused by: {}\n", cause));
        source = StdError::source(cause);
    }
    chain
}

/// 原因連鎖と失敗地点のフレーム（先頭の数フレーム）を整形する
pub(crate) fn format_traceback(chain: &str, trace: Option<&FaultTrace>) -> String {
    let mut out = String::from(chain);
    let trace = match trace {
        Some(trace) => trace,
        None => {
            out.push_str("  <no frames recorded>\n");
            return out;
        }
    };

    let frames = split_frames(&trace.backtrace().to_string());
    let start = frames
        .iter()
        .position(|frame| !is_machinery(frame))
        .unwrap_or(0);
    let shown = &frames[start..];
    for frame in shown.iter().take(TRACEBACK_FRAMES) {
        out.push_str(frame);
    }
    if shown.len() > TRACEBACK_FRAMES {
        out.push_str("  ...\n");
    }
    out
}

/// バックトレースの表示をフレームごとに分ける（位置行は直前のフレームに付く）
fn split_frames(backtrace: &str) -> Vec<String> {
    let mut frames: Vec<String> = Vec::new();
    for line in backtrace.lines() {
        if frame_name(line).is_some() || frames.is_empty() {
            frames.push(String::new());
        }
        if let Some(frame) = frames.last_mut() {
            frame.push_str(line);
            frame.push('\n');
        }
    }
    frames
}

/// `  12: path::to::function` 形式の行なら関数名を返す
fn frame_name(line: &str) -> Option<&str> {
    let (number, name) = line.trim_start().split_once(':')?;
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(name.trim())
}

fn is_machinery(frame: &str) -> bool {
    frame
        .lines()
        .next()
        .and_then(frame_name)
        .map(|name| MACHINERY_PREFIXES.iter().any(|prefix| name.starts_with(prefix)))
        .unwrap_or(false)
}
