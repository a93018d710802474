//! Lua interpreter construction.

use mlua::prelude::*;

/// Create the interpreter a single description file runs in.
///
/// Each file gets a fresh state so stray globals cannot leak between
/// packages; everything durable goes through the registered functions.
pub fn create_lua() -> LuaResult<Lua> {
  let lua = Lua::new();
  // Description files have no business reaching for the OS or the
  // filesystem; loading and emission are the driver's job.
  for intrinsic in ["io", "os", "package", "require", "dofile", "loadfile"] {
    lua.globals().set(intrinsic, LuaValue::Nil)?;
  }
  Ok(lua)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn plain_lua_still_works() -> LuaResult<()> {
    let lua = create_lua()?;
    let n: i64 = lua.load("return 20 + 22").eval()?;
    assert_eq!(n, 42);
    Ok(())
  }

  #[test]
  fn filesystem_intrinsics_are_absent() -> LuaResult<()> {
    let lua = create_lua()?;
    let io_is_nil: bool = lua.load("return io == nil").eval()?;
    let os_is_nil: bool = lua.load("return os == nil").eval()?;
    assert!(io_is_nil);
    assert!(os_is_nil);
    Ok(())
  }
}
