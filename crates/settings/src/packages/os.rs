//! Operating system facade for scripts
//!
//! Exposed as the `os` global. Replaces the stock Lua `os` library with a
//! host-controlled set: working directory and path resolution are answered
//! relative to the configuration root rather than the process directory, so
//! loading never mutates process-wide state.

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike, Utc};
use mlua::prelude::*;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

/// Resolve a script-supplied path against the configuration root
fn resolve(base: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

fn format_local(dt: &DateTime<Local>, fmt: &str) -> LuaResult<String> {
    let mut out = String::new();
    write!(out, "{}", dt.format(fmt))
        .map_err(|_| LuaError::RuntimeError(format!("invalid date format '{fmt}'")))?;
    Ok(out)
}

fn format_utc(dt: &DateTime<Utc>, fmt: &str) -> LuaResult<String> {
    let mut out = String::new();
    write!(out, "{}", dt.format(fmt))
        .map_err(|_| LuaError::RuntimeError(format!("invalid date format '{fmt}'")))?;
    Ok(out)
}

fn date_table<Tz: TimeZone>(lua: &Lua, dt: &DateTime<Tz>, is_local: bool) -> LuaResult<LuaTable> {
    let table = lua.create_table()?;
    table.set("year", dt.year())?;
    table.set("month", dt.month())?;
    table.set("day", dt.day())?;
    table.set("hour", dt.hour())?;
    table.set("min", dt.minute())?;
    table.set("sec", dt.second())?;
    table.set("wday", dt.weekday().num_days_from_sunday())?;
    table.set("yday", dt.ordinal())?;
    table.set("isdst", is_local)?;
    Ok(table)
}

pub(crate) fn register(lua: &Lua, base: &Path) -> LuaResult<()> {
    let table = lua.create_table()?;
    let started = Instant::now();

    let root = base.to_path_buf();
    table.set(
        "getcwd",
        lua.create_function(move |_, ()| Ok(root.display().to_string()))?,
    )?;

    let root = base.to_path_buf();
    table.set(
        "realpath",
        lua.create_function(move |_, path: String| {
            if path.is_empty() {
                return Ok(String::new());
            }
            let resolved = resolve(&root, &path);
            let canonical = resolved.canonicalize().unwrap_or(resolved);
            Ok(canonical.display().to_string())
        })?,
    )?;

    table.set(
        "clock",
        lua.create_function(move |_, ()| Ok(started.elapsed().as_secs_f64()))?,
    )?;

    table.set(
        "time",
        lua.create_function(|_, table: Option<LuaTable>| match table {
            None => Ok(Utc::now().timestamp()),
            Some(t) => {
                let year: i32 = t.get("year")?;
                let month: u32 = t.get("month")?;
                let day: u32 = t.get("day")?;
                let hour: u32 = t.get("hour").unwrap_or(12);
                let min: u32 = t.get("min").unwrap_or(0);
                let sec: u32 = t.get("sec").unwrap_or(0);
                Local
                    .with_ymd_and_hms(year, month, day, hour, min, sec)
                    .single()
                    .map(|dt| dt.timestamp())
                    .ok_or_else(|| LuaError::RuntimeError("invalid date-time table".to_string()))
            }
        })?,
    )?;

    table.set(
        "date",
        lua.create_function(|lua, (format, time): (Option<String>, Option<i64>)| {
            let fmt = format.unwrap_or_else(|| "%c".to_string());
            let to_utc = fmt.starts_with('!');
            let fmt = if to_utc { fmt[1..].to_string() } else { fmt };

            let utc: DateTime<Utc> = match time {
                Some(secs) => DateTime::from_timestamp(secs, 0).ok_or_else(|| {
                    LuaError::RuntimeError(format!("timestamp {secs} out of range"))
                })?,
                None => Utc::now(),
            };

            if fmt == "*t" {
                let table = if to_utc {
                    date_table(lua, &utc, false)?
                } else {
                    date_table(lua, &utc.with_timezone(&Local), true)?
                };
                return Ok(LuaValue::Table(table));
            }

            let formatted = if to_utc {
                format_utc(&utc, &fmt)?
            } else {
                format_local(&utc.with_timezone(&Local), &fmt)?
            };
            Ok(LuaValue::String(lua.create_string(&formatted)?))
        })?,
    )?;

    table.set(
        "getenv",
        lua.create_function(|_, name: String| Ok(std::env::var(&name).ok()))?,
    )?;

    let root = base.to_path_buf();
    table.set(
        "remove",
        lua.create_function(move |_, path: String| {
            let target = resolve(&root, &path);
            let result = if target.is_dir() {
                std::fs::remove_dir(&target)
            } else {
                std::fs::remove_file(&target)
            };
            match result {
                Ok(()) => Ok((Some(true), None)),
                Err(e) => Ok((None, Some(format!("{}: {e}", target.display())))),
            }
        })?,
    )?;

    let root = base.to_path_buf();
    table.set(
        "rename",
        lua.create_function(move |_, (from, to): (String, String)| {
            let from = resolve(&root, &from);
            let to = resolve(&root, &to);
            match std::fs::rename(&from, &to) {
                Ok(()) => Ok((Some(true), None)),
                Err(e) => Ok((None, Some(format!("{}: {e}", from.display())))),
            }
        })?,
    )?;

    table.set(
        "tmpname",
        lua.create_function(|_, ()| {
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            let name = std::env::temp_dir().join(format!("lua_{}_{nanos}", std::process::id()));
            Ok(name.display().to_string())
        })?,
    )?;

    table.set(
        "execute",
        lua.create_function(|_, command: Option<String>| {
            let Some(command) = command else {
                // No argument asks whether a shell is available
                return Ok((true, None, None));
            };
            let (shell, flag) = if cfg!(windows) {
                ("cmd", "/C")
            } else {
                ("sh", "-c")
            };
            match Command::new(shell).arg(flag).arg(&command).status() {
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    Ok((status.success(), Some("exit".to_string()), Some(code)))
                }
                Err(e) => Err(LuaError::RuntimeError(format!(
                    "failed to execute '{command}': {e}"
                ))),
            }
        })?,
    )?;

    table.set(
        "exit",
        lua.create_function(|_, code: Option<i32>| -> LuaResult<()> {
            std::process::exit(code.unwrap_or(0));
        })?,
    )?;

    lua.globals().set("os", table)?;
    Ok(())
}
