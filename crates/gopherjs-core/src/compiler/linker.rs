use std::io::Write;
use std::sync::Arc;

use crate::compiler::Archive;
use crate::error::Result;

/// Writes the loadable program for `deps` (dependency order, main package
/// last) to `w`. Every package becomes a registration unit with the
/// bootstrap registry; the registry starts the last package once the whole
/// file has run.
pub fn write_program_code<W: Write + ?Sized>(
    deps: &[Arc<Archive>],
    w: &mut W,
    go_release: &str,
) -> Result<()> {
    w.write_all(b"\"use strict\";\n(function() {\n\n")?;
    w.write_all(gopherjs_runtime::prelude().as_bytes())?;
    writeln!(w, "var $goVersion = {};\n", json_string(go_release))?;

    for archive in deps {
        write_package_code(archive, w)?;
    }

    if let Some(main) = deps.last() {
        writeln!(w, "$packages.$start({});", json_string(&main.import_path))?;
    }
    w.write_all(b"\n}).call(this);\n")?;
    Ok(())
}

/// The registration unit of one package, as emitted into the program or
/// served separately as `<import path>.js`.
pub fn write_package_code<W: Write + ?Sized>(archive: &Archive, w: &mut W) -> Result<()> {
    let imports = serde_json::to_string(&archive.imports).unwrap_or_else(|_| "[]".to_string());
    writeln!(
        w,
        "$packages.$register({}, {}, async function($import) {{",
        json_string(&archive.import_path),
        imports
    )?;
    w.write_all(b"\tvar $pkg = {}, $init;\n")?;
    w.write_all(archive.inc_js_code.as_bytes())?;
    w.write_all(archive.code.as_bytes())?;
    w.write_all(b"\treturn $pkg;\n});\n\n")?;
    Ok(())
}

pub(crate) fn json_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}
