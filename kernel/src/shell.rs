//! Kernel shell.
//!
//! A small line-oriented shell on the console, driving the whole kernel
//! API surface: filesystem commands, program launch, memory and USB
//! diagnostics, and the gap-buffer text editor.  The shell deliberately
//! goes through the same [`Kapi`] dispatch table programs get, so the
//! userspace contract is exercised on every boot.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use kikios_userlib::gap_buffer::{GapBuffer, LineIndex};
use kikios_userlib::{keys, Fd, Kapi, KapiError};

/// Prompt string.
const PROMPT: &str = "kiki> ";

fn err_name(e: KapiError) -> &'static str {
    match e {
        KapiError::NotFound => "not found",
        KapiError::IsADirectory => "is a directory",
        KapiError::NotADirectory => "not a directory",
        KapiError::NotEmpty => "directory not empty",
        KapiError::IoError => "I/O error",
        KapiError::OutOfSpace => "no space left",
        KapiError::NameTooLong => "name too long",
        KapiError::NoMemory => "out of memory",
        KapiError::NoSuchProgram => "no such program",
        KapiError::BadHandle => "bad handle",
        KapiError::TooManyOpenFiles => "too many open files",
    }
}

/// Read one line with minimal editing (backspace), echoing as we go.
fn read_line(kapi: &dyn Kapi, buf: &mut String) {
    buf.clear();
    loop {
        let Some(key) = kapi.getc() else {
            kapi.sleep_ms(5);
            continue;
        };
        match key {
            k if k == '\n' as u32 || k == '\r' as u32 => {
                kapi.putc('\n');
                return;
            }
            keys::KEY_BACKSPACE => {
                if buf.pop().is_some() {
                    kapi.putc('\x08');
                    kapi.putc(' ');
                    kapi.putc('\x08');
                }
            }
            k if keys::is_printable(k) => {
                if let Some(c) = char::from_u32(k) {
                    buf.push(c);
                    kapi.putc(c);
                }
            }
            _ => {}
        }
    }
}

/// Normalize a user path argument: absolute as-is, otherwise rooted.
fn abs_path(arg: &str) -> String {
    if arg.starts_with('/') {
        String::from(arg)
    } else {
        let mut p = String::from("/");
        p.push_str(arg);
        p
    }
}

fn read_whole_file(kapi: &dyn Kapi, fd: Fd) -> Result<Vec<u8>, KapiError> {
    let size = kapi.file_size(fd)? as usize;
    let mut data = alloc::vec![0u8; size];
    let mut got = 0;
    while got < size {
        let n = kapi.read(fd, &mut data[got..], got as u32)?;
        if n == 0 {
            break;
        }
        got += n;
    }
    data.truncate(got);
    Ok(data)
}

fn cmd_ls(kapi: &dyn Kapi, arg: &str) {
    let path = if arg.is_empty() { String::from("/") } else { abs_path(arg) };
    let mut index = 0;
    loop {
        match kapi.readdir(&path, index) {
            Ok(Some(entry)) => {
                let name = entry.name();
                if entry.is_dir {
                    kapi.puts(&format!("{}/\n", name));
                } else {
                    kapi.puts(&format!("{:<32} {:>8}\n", name, entry.size));
                }
                index += 1;
            }
            Ok(None) => break,
            Err(e) => {
                kapi.puts(&format!("ls: {}: {}\n", path, err_name(e)));
                break;
            }
        }
    }
}

fn cmd_cat(kapi: &dyn Kapi, arg: &str) {
    let path = abs_path(arg);
    match kapi.open(&path) {
        Ok(fd) => {
            match read_whole_file(kapi, fd) {
                Ok(data) => {
                    kapi.puts(&String::from_utf8_lossy(&data));
                    kapi.putc('\n');
                }
                Err(e) => kapi.puts(&format!("cat: {}\n", err_name(e))),
            }
            kapi.close(fd);
        }
        Err(e) => kapi.puts(&format!("cat: {}: {}\n", path, err_name(e))),
    }
}

fn cmd_write(kapi: &dyn Kapi, args: &str) {
    let (name, content) = match args.split_once(' ') {
        Some(pair) => pair,
        None => (args, ""),
    };
    if name.is_empty() {
        kapi.puts("usage: write FILE TEXT\n");
        return;
    }
    let path = abs_path(name);
    match kapi.create(&path).and_then(|fd| {
        let r = kapi.write(fd, content.as_bytes());
        kapi.close(fd);
        r
    }) {
        Ok(n) => kapi.puts(&format!("{} bytes\n", n)),
        Err(e) => kapi.puts(&format!("write: {}: {}\n", path, err_name(e))),
    }
}

fn cmd_rm(arg: &str, recursive: bool) -> Result<(), kikios_storage::FsError> {
    let path = abs_path(arg);
    crate::fs::with_volume(|v| {
        if recursive {
            v.delete_recursive(&path)
        } else {
            v.delete(&path)
        }
    })
}

fn cmd_free(kapi: &dyn Kapi) {
    let (used, free, count) = crate::memory::stats();
    kapi.puts(&format!(
        "heap: {} KB used, {} KB free, {} allocations\n",
        used / 1024,
        free / 1024,
        count
    ));
    if let Ok(clusters) = crate::fs::with_volume(|v| v.free_clusters()) {
        let cs = crate::fs::with_volume(|v| Ok(v.cluster_size())).unwrap_or(0);
        kapi.puts(&format!(
            "disk: {} free clusters ({} KB)\n",
            clusters,
            clusters as usize * cs / 1024
        ));
    }
}

fn cmd_lsusb(kapi: &dyn Kapi) {
    let count = kapi.usb_device_count();
    if count == 0 {
        kapi.puts("no USB devices\n");
        return;
    }
    for i in 0..count {
        if let Some(d) = kapi.usb_device_info(i) {
            kapi.puts(&format!(
                "addr {:>3}  {:?}-speed  mps {:>3}  parent {}:{}{}\n",
                d.address,
                d.speed,
                d.max_packet_size,
                d.parent_hub,
                d.parent_port,
                if d.is_hub {
                    format!("  hub ({} ports)", d.hub_ports)
                } else {
                    String::new()
                }
            ));
        }
    }
}

fn cmd_help(kapi: &dyn Kapi) {
    kapi.puts(
        "commands:\n\
         \x20 ls [DIR]          list a directory\n\
         \x20 cat FILE          print a file\n\
         \x20 write FILE TEXT   replace a file's contents\n\
         \x20 touch FILE        create an empty file\n\
         \x20 mkdir DIR         create a directory\n\
         \x20 rm PATH           delete a file\n\
         \x20 rm -r PATH        delete recursively\n\
         \x20 rmdir DIR         delete an empty directory\n\
         \x20 mv OLD NEW        rename within a directory\n\
         \x20 run FILE [ARGS]   run a flat binary\n\
         \x20 edit FILE         open the editor\n\
         \x20 free              heap and disk usage\n\
         \x20 lsusb             enumerated USB devices\n\
         \x20 uptime            time since boot\n\
         \x20 clear             clear the screen\n",
    );
}

/// Dispatch one command line.
fn dispatch(kapi: &dyn Kapi, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let (cmd, rest) = match line.split_once(' ') {
        Some((c, r)) => (c, r.trim()),
        None => (line, ""),
    };

    match cmd {
        "help" => cmd_help(kapi),
        "ls" => cmd_ls(kapi, rest),
        "cat" => cmd_cat(kapi, rest),
        "write" => cmd_write(kapi, rest),
        "touch" => {
            let path = abs_path(rest);
            if let Err(e) = crate::fs::with_volume(|v| v.create_file(&path)) {
                kapi.puts(&format!("touch: {:?}\n", e));
            }
        }
        "mkdir" => {
            let path = abs_path(rest);
            if let Err(e) = crate::fs::with_volume(|v| v.mkdir(&path)) {
                kapi.puts(&format!("mkdir: {:?}\n", e));
            }
        }
        "rm" => {
            let (recursive, target) = match rest.strip_prefix("-r ") {
                Some(t) => (true, t.trim()),
                None => (false, rest),
            };
            if let Err(e) = cmd_rm(target, recursive) {
                kapi.puts(&format!("rm: {:?}\n", e));
            }
        }
        "rmdir" => {
            let path = abs_path(rest);
            if let Err(e) = crate::fs::with_volume(|v| v.rmdir(&path)) {
                kapi.puts(&format!("rmdir: {:?}\n", e));
            }
        }
        "mv" => match rest.split_once(' ') {
            Some((old, new)) => {
                let path = abs_path(old.trim());
                let new_name = new.trim().trim_start_matches('/');
                if let Err(e) = crate::fs::with_volume(|v| v.rename(&path, new_name)) {
                    kapi.puts(&format!("mv: {:?}\n", e));
                }
            }
            None => kapi.puts("usage: mv OLD NEWNAME\n"),
        },
        "run" => {
            let (prog, args_str) = match rest.split_once(' ') {
                Some((p, a)) => (p, a.trim()),
                None => (rest, ""),
            };
            let args: Vec<&str> = args_str.split_whitespace().collect();
            match kapi.exec(&abs_path(prog), &args) {
                Ok(code) => {
                    if code != 0 {
                        kapi.puts(&format!("exit code {}\n", code));
                    }
                }
                Err(e) => kapi.puts(&format!("run: {}: {}\n", prog, err_name(e))),
            }
        }
        "edit" => editor(kapi, &abs_path(rest)),
        "free" => cmd_free(kapi),
        "lsusb" => cmd_lsusb(kapi),
        "uptime" => {
            let ms = kapi.uptime_ms();
            kapi.puts(&format!(
                "up {}.{:03} s ({} context switches)\n",
                ms / 1000,
                ms % 1000,
                crate::sched::context_switches()
            ));
        }
        "clear" => kapi.clear(),
        _ => kapi.puts(&format!("{}: unknown command (try `help`)\n", cmd)),
    }
}

/// Shell main loop.  Never returns.
pub fn run(kapi: &'static dyn Kapi) -> ! {
    kapi.puts("\nKikiOS shell. `help` lists commands.\n");
    let mut line = String::new();
    loop {
        kapi.puts(PROMPT);
        read_line(kapi, &mut line);
        dispatch(kapi, &line);
    }
}

// ── Editor ──────────────────────────────────────────────────────────

/// Full-screen gap-buffer editor.  Ctrl+S saves, Ctrl+Q quits; arrows,
/// Home/End, Backspace and Delete behave as expected.
fn editor(kapi: &dyn Kapi, path: &str) {
    let initial = match kapi.open(path) {
        Ok(fd) => {
            let data = read_whole_file(kapi, fd).unwrap_or_default();
            kapi.close(fd);
            data
        }
        Err(KapiError::NotFound) => Vec::new(),
        Err(e) => {
            kapi.puts(&format!("edit: {}: {}\n", path, err_name(e)));
            return;
        }
    };

    let mut gb = GapBuffer::from_bytes(&initial);
    gb.seek(0);
    let rows = kapi.console_rows().saturating_sub(1).max(1);
    let cols = kapi.console_cols().max(1);
    let mut top_line = 0usize;
    let mut dirty = false;

    kapi.clear();
    loop {
        // Redraw the visible window plus a status line.
        let index = LineIndex::build(&gb);
        let (cur_line, cur_col) = index.position(gb.cursor());
        if cur_line < top_line {
            top_line = cur_line;
        }
        if cur_line >= top_line + rows {
            top_line = cur_line - rows + 1;
        }

        let text = gb.to_vec();
        for screen_row in 0..rows {
            kapi.set_cursor(screen_row, 0);
            kapi.clear_to_eol();
            let line = top_line + screen_row;
            if let Some(start) = index.line_start(line) {
                let end = index
                    .line_start(line + 1)
                    .map(|e| e.saturating_sub(1))
                    .unwrap_or(text.len());
                let slice = &text[start.min(text.len())..end.min(text.len())];
                let shown = core::str::from_utf8(slice).unwrap_or("");
                let mut count = 0;
                for c in shown.chars() {
                    if count >= cols {
                        break;
                    }
                    kapi.putc(c);
                    count += 1;
                }
            }
        }
        kapi.set_cursor(rows, 0);
        kapi.clear_to_eol();
        kapi.puts(&format!(
            "-- {}{}  L{} C{}  ^S save  ^Q quit --",
            path,
            if dirty { " *" } else { "" },
            cur_line + 1,
            cur_col + 1
        ));
        kapi.set_cursor(cur_line - top_line, cur_col.min(cols - 1));

        // One key at a time; block politely.
        let key = loop {
            match kapi.getc() {
                Some(k) => break k,
                None => kapi.sleep_ms(5),
            }
        };

        match key {
            0x13 => {
                // Ctrl+S: write back.
                let data = gb.to_vec();
                match kapi.create(path).and_then(|fd| {
                    let r = kapi.write(fd, &data);
                    kapi.close(fd);
                    r
                }) {
                    Ok(_) => dirty = false,
                    Err(_) => {}
                }
            }
            0x11 => {
                // Ctrl+Q: leave.
                kapi.clear();
                if dirty {
                    kapi.puts("(unsaved changes discarded)\n");
                }
                return;
            }
            keys::KEY_LEFT => gb.seek(gb.cursor().saturating_sub(1)),
            keys::KEY_RIGHT => gb.seek(gb.cursor() + 1),
            keys::KEY_UP => {
                if cur_line > 0 {
                    let start = index.line_start(cur_line - 1).unwrap_or(0);
                    let prev_len = index.line_start(cur_line).unwrap_or(0) - start;
                    gb.seek(start + cur_col.min(prev_len.saturating_sub(1)));
                }
            }
            keys::KEY_DOWN => {
                if cur_line + 1 < index.line_count() {
                    let start = index.line_start(cur_line + 1).unwrap_or(0);
                    let end = index
                        .line_start(cur_line + 2)
                        .map(|e| e - 1)
                        .unwrap_or(gb.len());
                    gb.seek((start + cur_col).min(end));
                }
            }
            keys::KEY_HOME => {
                gb.seek(index.line_start(cur_line).unwrap_or(0));
            }
            keys::KEY_END => {
                let end = index
                    .line_start(cur_line + 1)
                    .map(|e| e - 1)
                    .unwrap_or(gb.len());
                gb.seek(end);
            }
            keys::KEY_BACKSPACE => {
                if gb.delete_before().is_some() {
                    dirty = true;
                }
            }
            keys::KEY_DELETE => {
                if gb.delete_after().is_some() {
                    dirty = true;
                }
            }
            k if k == '\n' as u32 || k == '\r' as u32 => {
                gb.insert(b'\n');
                dirty = true;
            }
            k if k == '\t' as u32 => {
                gb.insert_slice(b"    ");
                dirty = true;
            }
            k if keys::is_printable(k) => {
                if let Some(c) = char::from_u32(k) {
                    let mut utf8 = [0u8; 4];
                    gb.insert_slice(c.encode_utf8(&mut utf8).as_bytes());
                    dirty = true;
                }
            }
            _ => {}
        }
    }
}
