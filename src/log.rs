//! Minimal logging shim, mirrors what the rest of the core expects from a
//! `log` crate without pulling one in: three free functions over `eprintln!`.

#[allow(unused)]
pub(crate) fn info(msg: &str) {
    eprintln!("[info] {msg}");
}

#[allow(unused)]
pub(crate) fn warn(msg: &str) {
    eprintln!("[warn] {msg}");
}

#[allow(unused)]
pub(crate) fn error(msg: &str) {
    eprintln!("[error] {msg}");
}
