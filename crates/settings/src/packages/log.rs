//! Leveled logging facade for scripts
//!
//! Exposed as the `log` global: `log.info("...")`, `log.error("...")` etc.
//! Messages are forwarded to the host's `tracing` subscriber.

use mlua::prelude::*;

pub(crate) fn register(lua: &Lua) -> LuaResult<()> {
    let table = lua.create_table()?;

    table.set(
        "log",
        lua.create_function(|_, text: String| {
            tracing::info!(target: "settings::script", "{text}");
            Ok(())
        })?,
    )?;
    table.set(
        "debug",
        lua.create_function(|_, text: String| {
            tracing::debug!(target: "settings::script", "{text}");
            Ok(())
        })?,
    )?;
    table.set(
        "info",
        lua.create_function(|_, text: String| {
            tracing::info!(target: "settings::script", "{text}");
            Ok(())
        })?,
    )?;
    table.set(
        "warning",
        lua.create_function(|_, text: String| {
            tracing::warn!(target: "settings::script", "{text}");
            Ok(())
        })?,
    )?;
    table.set(
        "error",
        lua.create_function(|_, text: String| {
            tracing::error!(target: "settings::script", "{text}");
            Ok(())
        })?,
    )?;
    table.set(
        "success",
        lua.create_function(|_, text: String| {
            tracing::info!(target: "settings::script", success = true, "{text}");
            Ok(())
        })?,
    )?;

    lua.globals().set("log", table)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_functions_are_callable() {
        let lua = Lua::new();
        register(&lua).unwrap();
        lua.load(
            r#"
            log.log("plain")
            log.debug("debug")
            log.info("info")
            log.warning("warning")
            log.error("error")
            log.success("success")
        "#,
        )
        .exec()
        .unwrap();
    }
}
