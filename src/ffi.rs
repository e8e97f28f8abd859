use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};

use crate::catalog::CatalogKind;
use crate::pending::{NewPendingRecord, PendingKind, VoucherLine};
use crate::session::Session;
use crate::sqlite::{self, SqliteStore};

/// Opaque handle that owns the on-device store.
/// The native app holds this as an unsafe pointer and passes it back to Rust APIs.
pub struct FieldStoreHandle {
    store: SqliteStore,
}

fn ptr_to_str<'a>(ptr: *const c_char) -> Result<&'a str, ()> {
    if ptr.is_null() {
        return Err(());
    }
    unsafe { CStr::from_ptr(ptr).to_str().map_err(|_| ()) }
}

fn to_cstring_ptr(s: &str) -> *mut c_char {
    CString::new(s).map(|cs| cs.into_raw()).unwrap_or(std::ptr::null_mut())
}

fn handle_ref<'a>(handle: *mut FieldStoreHandle) -> Option<&'a FieldStoreHandle> {
    unsafe { handle.as_ref() }
}

fn pending_kind(ptr: *const c_char) -> Option<PendingKind> {
    ptr_to_str(ptr).ok().and_then(PendingKind::from_slug)
}

/// Free a C string returned by this library.
#[unsafe(no_mangle)]
pub extern "C" fn fs_string_free(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    unsafe {
        let _ = CString::from_raw(s);
    }
}

/// Open (and initialize) the store at `path`; ":memory:" works too.
/// Returns null on failure.
#[unsafe(no_mangle)]
pub extern "C" fn fs_open(path: *const c_char) -> *mut FieldStoreHandle {
    let path = match ptr_to_str(path) {
        Ok(s) => s,
        Err(_) => return std::ptr::null_mut(),
    };
    match SqliteStore::open(path) {
        Ok(store) => Box::into_raw(Box::new(FieldStoreHandle { store })),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Close a previously opened store.
#[unsafe(no_mangle)]
pub extern "C" fn fs_close(handle: *mut FieldStoreHandle) {
    if handle.is_null() {
        return;
    }
    unsafe {
        let _ = Box::from_raw(handle);
    }
}

/// Re-run schema creation. Returns 0 on success, 1 on error, 2 on a null handle.
#[unsafe(no_mangle)]
pub extern "C" fn fs_init_schema(handle: *mut FieldStoreHandle) -> c_int {
    match handle_ref(handle) {
        Some(h) => match h.store.init_schema() {
            Ok(_) => 0,
            Err(_) => 1,
        },
        None => 2,
    }
}

/// Queue a captured record given as JSON (`NewPendingRecord` shape).
/// Vouchers go through `fs_save_voucher_json`.
/// Returns the local id (>=1) or -1 on error.
#[unsafe(no_mangle)]
pub extern "C" fn fs_save_pending_json(handle: *mut FieldStoreHandle, record_json: *const c_char) -> i64 {
    let Some(h) = handle_ref(handle) else { return -1 };
    let Ok(raw) = ptr_to_str(record_json) else { return -1 };
    let record: NewPendingRecord = match serde_json::from_str(raw) {
        Ok(r) => r,
        Err(_) => return -1,
    };
    if record.kind.has_detail_lines() {
        return -1;
    }
    match h.store.with_conn(|c| sqlite::insert_pending(c, &record)) {
        Ok(id) => id,
        Err(_) => -1,
    }
}

/// Queue a voucher: header JSON (`NewPendingRecord` shape) plus a JSON array of lines,
/// stored together. Returns the local id (>=1) or -1 on error.
#[unsafe(no_mangle)]
pub extern "C" fn fs_save_voucher_json(
    handle: *mut FieldStoreHandle,
    header_json: *const c_char,
    lines_json: *const c_char,
) -> i64 {
    let Some(h) = handle_ref(handle) else { return -1 };
    let (Ok(header_raw), Ok(lines_raw)) = (ptr_to_str(header_json), ptr_to_str(lines_json)) else {
        return -1;
    };
    let header: NewPendingRecord = match serde_json::from_str(header_raw) {
        Ok(r) => r,
        Err(_) => return -1,
    };
    let lines: Vec<VoucherLine> = match serde_json::from_str(lines_raw) {
        Ok(l) => l,
        Err(_) => return -1,
    };
    match h.store.with_tx(|tx| sqlite::insert_voucher(tx, &header, &lines)) {
        Ok(id) => id,
        Err(_) => -1,
    }
}

/// Backlog size for a record kind slug (e.g. "rat_trap"). Returns -1 on error.
#[unsafe(no_mangle)]
pub extern "C" fn fs_pending_count(handle: *mut FieldStoreHandle, kind: *const c_char) -> i64 {
    let (Some(h), Some(kind)) = (handle_ref(handle), pending_kind(kind)) else {
        return -1;
    };
    match h.store.with_conn(|c| sqlite::count_pending(c, kind)) {
        Ok(n) => n as i64,
        Err(_) => -1,
    }
}

/// Backlog of a record kind as a JSON array. Returns a new C string or null on error.
#[unsafe(no_mangle)]
pub extern "C" fn fs_pending_json(handle: *mut FieldStoreHandle, kind: *const c_char) -> *mut c_char {
    let (Some(h), Some(kind)) = (handle_ref(handle), pending_kind(kind)) else {
        return std::ptr::null_mut();
    };
    match h.store.with_conn(|c| sqlite::load_pending(c, kind)) {
        Ok(records) => match serde_json::to_string(&records) {
            Ok(s) => to_cstring_ptr(&s),
            Err(_) => std::ptr::null_mut(),
        },
        Err(_) => std::ptr::null_mut(),
    }
}

/// Rows of a catalog slug (e.g. "campos") as a JSON array of server objects.
/// Returns a new C string or null on error.
#[unsafe(no_mangle)]
pub extern "C" fn fs_catalog_json(handle: *mut FieldStoreHandle, catalog: *const c_char) -> *mut c_char {
    let Some(h) = handle_ref(handle) else {
        return std::ptr::null_mut();
    };
    let Some(kind) = ptr_to_str(catalog).ok().and_then(CatalogKind::from_slug) else {
        return std::ptr::null_mut();
    };
    match h.store.with_conn(|c| sqlite::load_catalog(c, kind)) {
        Ok(rows) => {
            let data: Vec<&serde_json::Value> = rows.iter().map(|r| &r.data).collect();
            match serde_json::to_string(&data) {
                Ok(s) => to_cstring_ptr(&s),
                Err(_) => std::ptr::null_mut(),
            }
        }
        Err(_) => std::ptr::null_mut(),
    }
}

/// Store the session produced by the login flow. Returns 0 on success.
#[unsafe(no_mangle)]
pub extern "C" fn fs_save_session_json(handle: *mut FieldStoreHandle, session_json: *const c_char) -> c_int {
    let Some(h) = handle_ref(handle) else { return 2 };
    let Ok(raw) = ptr_to_str(session_json) else { return 3 };
    let session: Session = match serde_json::from_str(raw) {
        Ok(s) => s,
        Err(_) => return 3,
    };
    match h.store.save_session(&session) {
        Ok(_) => 0,
        Err(_) => 1,
    }
}
