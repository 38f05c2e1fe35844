// ─── Process Spawn Primitives ───
// Create-suspended, module injection, resume/wait, and verb-based shell
// launches ("open" / "runas"). Windows implementation with a degraded
// portable fallback so the crate builds and tests everywhere.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpawnError {
    /// The OS refused process creation because elevation is required.
    #[error("target process requires elevation")]
    ElevationRequired,

    #[error("{0}")]
    Failed(String),
}

/// Shell launch verb for the next supervisor generation or an on-quit command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchVerb {
    Open,
    RunElevated,
}

impl LaunchVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            LaunchVerb::Open => "open",
            LaunchVerb::RunElevated => "runas",
        }
    }

    /// Operations read back from persisted command records. Anything that is
    /// not explicitly elevated runs plain.
    pub fn from_operation(operation: &str) -> Self {
        match operation {
            "runas" => LaunchVerb::RunElevated,
            _ => LaunchVerb::Open,
        }
    }
}

/// A target process created suspended, exclusively owned by the supervisor
/// until it either resumes or is terminated.
pub trait TargetProcess {
    /// Load `module` into the target's address space before it runs.
    fn inject_module(&mut self, module: &Path) -> Result<(), SpawnError>;

    fn resume(&mut self) -> Result<(), SpawnError>;

    /// Block until the target exits and return its exit code. Unbounded wait.
    fn wait_for_exit(&mut self) -> i32;

    fn terminate(&mut self, code: u32);
}

/// OS process primitives behind a seam so the state machine is testable
/// without spawning anything.
pub trait ProcessSpawner {
    fn create_suspended(
        &mut self,
        exe: &Path,
        cmdline: &str,
        workdir: &Path,
    ) -> Result<Box<dyn TargetProcess>, SpawnError>;

    /// Test-load `module` in this process to surface missing runtime
    /// dependencies before the real injection.
    fn probe_module(&mut self, module: &Path) -> Result<(), SpawnError>;

    /// Launch `file` through the shell with the given verb. Returns whether
    /// the launch started; with `blocking`, additionally waits for the
    /// spawned process to finish first.
    fn shell_execute(
        &mut self,
        verb: LaunchVerb,
        file: &Path,
        params: &str,
        workdir: Option<&Path>,
        show_cmd: Option<i32>,
        blocking: bool,
    ) -> bool;
}

/// Production spawner backed by the platform layer below.
#[derive(Debug, Default)]
pub struct NativeSpawner;

impl NativeSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSpawner for NativeSpawner {
    fn create_suspended(
        &mut self,
        exe: &Path,
        cmdline: &str,
        workdir: &Path,
    ) -> Result<Box<dyn TargetProcess>, SpawnError> {
        platform::create_suspended(exe, cmdline, workdir)
    }

    fn probe_module(&mut self, module: &Path) -> Result<(), SpawnError> {
        platform::probe_module(module)
    }

    fn shell_execute(
        &mut self,
        verb: LaunchVerb,
        file: &Path,
        params: &str,
        workdir: Option<&Path>,
        show_cmd: Option<i32>,
        blocking: bool,
    ) -> bool {
        platform::shell_execute(verb, file, params, workdir, show_cmd, blocking)
    }
}

/// Whether the current process holds elevated rights.
pub fn is_elevated() -> bool {
    platform::is_elevated()
}

#[cfg(target_os = "windows")]
mod platform {
    use super::{LaunchVerb, SpawnError, TargetProcess};
    use std::path::Path;

    use windows_sys::Win32::Foundation::{
        CloseHandle, GetLastError, ERROR_ELEVATION_REQUIRED, HANDLE,
    };
    use windows_sys::Win32::Security::{
        GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY,
    };
    use windows_sys::Win32::System::Diagnostics::Debug::{
        FormatMessageW, WriteProcessMemory, FORMAT_MESSAGE_FROM_SYSTEM,
        FORMAT_MESSAGE_IGNORE_INSERTS,
    };
    use windows_sys::Win32::System::LibraryLoader::{
        FreeLibrary, GetModuleHandleW, GetProcAddress, LoadLibraryW,
    };
    use windows_sys::Win32::System::Memory::{
        VirtualAllocEx, VirtualFreeEx, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
    };
    use windows_sys::Win32::System::Threading::{
        CreateProcessW, CreateRemoteThread, GetCurrentProcess, GetExitCodeProcess,
        GetExitCodeThread, OpenProcessToken, ResumeThread, TerminateProcess, WaitForSingleObject,
        CREATE_SUSPENDED, INFINITE, PROCESS_INFORMATION, STARTUPINFOW,
    };
    use windows_sys::Win32::UI::Shell::{ShellExecuteExW, SEE_MASK_NOCLOSEPROCESS, SHELLEXECUTEINFOW};
    use windows_sys::Win32::UI::WindowsAndMessaging::SW_SHOWNORMAL;

    fn wide(value: &str) -> Vec<u16> {
        value.encode_utf16().chain(std::iter::once(0)).collect()
    }

    fn wide_path(path: &Path) -> Vec<u16> {
        wide(&path.to_string_lossy())
    }

    fn system_error_message(code: u32) -> String {
        let mut buffer = [0u16; 512];
        let len = unsafe {
            FormatMessageW(
                FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
                std::ptr::null(),
                code,
                0,
                buffer.as_mut_ptr(),
                buffer.len() as u32,
                std::ptr::null(),
            )
        };
        if len == 0 {
            return format!("OS error {code}");
        }
        String::from_utf16_lossy(&buffer[..len as usize])
            .trim()
            .to_string()
    }

    struct WindowsTarget {
        process: HANDLE,
        thread: HANDLE,
    }

    impl TargetProcess for WindowsTarget {
        fn inject_module(&mut self, module: &Path) -> Result<(), SpawnError> {
            let path = wide_path(module);
            let byte_len = path.len() * std::mem::size_of::<u16>();

            unsafe {
                let remote = VirtualAllocEx(
                    self.process,
                    std::ptr::null(),
                    byte_len,
                    MEM_COMMIT | MEM_RESERVE,
                    PAGE_READWRITE,
                );
                if remote.is_null() {
                    return Err(SpawnError::Failed(system_error_message(GetLastError())));
                }

                let mut written = 0usize;
                if WriteProcessMemory(
                    self.process,
                    remote,
                    path.as_ptr().cast(),
                    byte_len,
                    &mut written,
                ) == 0
                {
                    let message = system_error_message(GetLastError());
                    VirtualFreeEx(self.process, remote, 0, MEM_RELEASE);
                    return Err(SpawnError::Failed(message));
                }

                let kernel32 = GetModuleHandleW(wide("kernel32.dll").as_ptr());
                let load_library = GetProcAddress(kernel32, b"LoadLibraryW\0".as_ptr());
                let Some(load_library) = load_library else {
                    VirtualFreeEx(self.process, remote, 0, MEM_RELEASE);
                    return Err(SpawnError::Failed("LoadLibraryW not found".to_string()));
                };

                let thread = CreateRemoteThread(
                    self.process,
                    std::ptr::null(),
                    0,
                    Some(std::mem::transmute::<
                        unsafe extern "system" fn() -> isize,
                        unsafe extern "system" fn(*mut core::ffi::c_void) -> u32,
                    >(load_library)),
                    remote,
                    0,
                    std::ptr::null_mut(),
                );
                if thread.is_null() {
                    let message = system_error_message(GetLastError());
                    VirtualFreeEx(self.process, remote, 0, MEM_RELEASE);
                    return Err(SpawnError::Failed(message));
                }

                WaitForSingleObject(thread, INFINITE);
                let mut module_handle = 0u32;
                GetExitCodeThread(thread, &mut module_handle);
                CloseHandle(thread);
                VirtualFreeEx(self.process, remote, 0, MEM_RELEASE);

                if module_handle == 0 {
                    return Err(SpawnError::Failed(
                        "support module failed to load in the target".to_string(),
                    ));
                }
            }

            Ok(())
        }

        fn resume(&mut self) -> Result<(), SpawnError> {
            if unsafe { ResumeThread(self.thread) } == u32::MAX {
                return Err(SpawnError::Failed(system_error_message(unsafe {
                    GetLastError()
                })));
            }
            Ok(())
        }

        fn wait_for_exit(&mut self) -> i32 {
            let mut code = 1u32;
            unsafe {
                WaitForSingleObject(self.process, INFINITE);
                GetExitCodeProcess(self.process, &mut code);
            }
            code as i32
        }

        fn terminate(&mut self, code: u32) {
            unsafe {
                TerminateProcess(self.process, code);
            }
        }
    }

    impl Drop for WindowsTarget {
        fn drop(&mut self) {
            unsafe {
                if !self.process.is_null() {
                    CloseHandle(self.process);
                }
                if !self.thread.is_null() {
                    CloseHandle(self.thread);
                }
            }
        }
    }

    pub fn create_suspended(
        exe: &Path,
        cmdline: &str,
        workdir: &Path,
    ) -> Result<Box<dyn TargetProcess>, SpawnError> {
        let app = wide_path(exe);
        // lpCommandLine must be mutable and carries argv[0] as well.
        let mut command_line = wide(&format!("\"{}\" {}", exe.display(), cmdline));
        let dir = wide_path(workdir);

        let mut startup: STARTUPINFOW = unsafe { std::mem::zeroed() };
        startup.cb = std::mem::size_of::<STARTUPINFOW>() as u32;
        let mut process_info: PROCESS_INFORMATION = unsafe { std::mem::zeroed() };

        let created = unsafe {
            CreateProcessW(
                app.as_ptr(),
                command_line.as_mut_ptr(),
                std::ptr::null(),
                std::ptr::null(),
                0,
                CREATE_SUSPENDED,
                std::ptr::null(),
                dir.as_ptr(),
                &startup,
                &mut process_info,
            )
        };
        if created == 0 {
            let code = unsafe { GetLastError() };
            return Err(if code == ERROR_ELEVATION_REQUIRED {
                SpawnError::ElevationRequired
            } else {
                SpawnError::Failed(system_error_message(code))
            });
        }

        Ok(Box::new(WindowsTarget {
            process: process_info.hProcess,
            thread: process_info.hThread,
        }))
    }

    pub fn probe_module(module: &Path) -> Result<(), SpawnError> {
        let path = wide_path(module);
        unsafe {
            let handle = LoadLibraryW(path.as_ptr());
            if handle.is_null() {
                return Err(SpawnError::Failed(system_error_message(GetLastError())));
            }
            FreeLibrary(handle);
        }
        Ok(())
    }

    pub fn shell_execute(
        verb: LaunchVerb,
        file: &Path,
        params: &str,
        workdir: Option<&Path>,
        show_cmd: Option<i32>,
        blocking: bool,
    ) -> bool {
        let verb_w = wide(verb.as_str());
        let file_w = wide_path(file);
        let params_w = wide(params);
        let dir_w = workdir.map(wide_path);

        let mut info: SHELLEXECUTEINFOW = unsafe { std::mem::zeroed() };
        info.cbSize = std::mem::size_of::<SHELLEXECUTEINFOW>() as u32;
        info.fMask = SEE_MASK_NOCLOSEPROCESS;
        info.lpVerb = verb_w.as_ptr();
        info.lpFile = file_w.as_ptr();
        info.lpParameters = if params.is_empty() {
            std::ptr::null()
        } else {
            params_w.as_ptr()
        };
        info.lpDirectory = dir_w
            .as_ref()
            .map_or(std::ptr::null(), |dir| dir.as_ptr());
        info.nShow = show_cmd.unwrap_or(SW_SHOWNORMAL);

        unsafe {
            if ShellExecuteExW(&mut info) == 0 {
                return false;
            }
            if !info.hProcess.is_null() {
                if blocking {
                    WaitForSingleObject(info.hProcess, INFINITE);
                }
                CloseHandle(info.hProcess);
            }
        }
        true
    }

    pub fn is_elevated() -> bool {
        unsafe {
            let mut token_handle = std::ptr::null_mut();
            if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token_handle) == 0 {
                return false;
            }

            let mut elevation = TOKEN_ELEVATION { TokenIsElevated: 0 };
            let mut return_length = 0u32;
            let result = GetTokenInformation(
                token_handle,
                TokenElevation,
                &mut elevation as *mut _ as *mut _,
                std::mem::size_of::<TOKEN_ELEVATION>() as u32,
                &mut return_length,
            );

            CloseHandle(token_handle);

            result != 0 && elevation.TokenIsElevated != 0
        }
    }
}

#[cfg(not(target_os = "windows"))]
mod platform {
    use super::{LaunchVerb, SpawnError, TargetProcess};
    use std::path::Path;

    use tracing::debug;

    // Non-Windows builds launch without suspension or injection; the launch
    // sequencing still runs so the rest of the supervisor is exercised.
    struct PortableTarget {
        child: std::process::Child,
    }

    impl TargetProcess for PortableTarget {
        fn inject_module(&mut self, module: &Path) -> Result<(), SpawnError> {
            debug!("Skipping module injection of {:?} on this platform", module);
            Ok(())
        }

        fn resume(&mut self) -> Result<(), SpawnError> {
            Ok(())
        }

        fn wait_for_exit(&mut self) -> i32 {
            match self.child.wait() {
                Ok(status) => status.code().unwrap_or(1),
                Err(_) => 1,
            }
        }

        fn terminate(&mut self, _code: u32) {
            let _ = self.child.kill();
        }
    }

    pub fn create_suspended(
        exe: &Path,
        cmdline: &str,
        workdir: &Path,
    ) -> Result<Box<dyn TargetProcess>, SpawnError> {
        let child = std::process::Command::new(exe)
            .args(cmdline.split_whitespace())
            .current_dir(workdir)
            .spawn()
            .map_err(|err| SpawnError::Failed(err.to_string()))?;
        Ok(Box::new(PortableTarget { child }))
    }

    pub fn probe_module(module: &Path) -> Result<(), SpawnError> {
        if module.exists() {
            Ok(())
        } else {
            Err(SpawnError::Failed(format!("{:?} does not exist", module)))
        }
    }

    pub fn shell_execute(
        verb: LaunchVerb,
        file: &Path,
        params: &str,
        workdir: Option<&Path>,
        _show_cmd: Option<i32>,
        blocking: bool,
    ) -> bool {
        if verb == LaunchVerb::RunElevated {
            // No portable elevation primitive; let callers fall back.
            return false;
        }
        let mut command = std::process::Command::new(file);
        command.args(params.split_whitespace());
        if let Some(dir) = workdir {
            command.current_dir(dir);
        }
        match command.spawn() {
            Ok(mut child) => {
                if blocking {
                    let _ = child.wait();
                }
                true
            }
            Err(_) => false,
        }
    }

    pub fn is_elevated() -> bool {
        false
    }
}
