//! Connection setup and wire primitives over librdmacm/libibverbs.
//!
//! Setup walks resolve -> endpoint -> {listen, accept} | connect -> register,
//! each step consuming the previous one's state. All raw FFI stays in this
//! module; the transfer loop only sees the [`Channel`] implementation.

use crate::config::{Config, Role};
use crate::error::{Error, Result, SetupStage};
use crate::memory::Buffer;
use crate::transfer::Channel;
use rdma_sys::{
    ibv_get_device_name, ibv_mr, ibv_qp_init_attr, ibv_wc, ibv_wc_status, ibv_wc_status_str,
    rdma_accept, rdma_addrinfo, rdma_cm_id, rdma_connect, rdma_create_ep, rdma_dereg_mr,
    rdma_destroy_ep, rdma_disconnect, rdma_freeaddrinfo, rdma_get_recv_comp, rdma_get_request,
    rdma_get_send_comp, rdma_getaddrinfo, rdma_listen, rdma_port_space, rdma_post_recv,
    rdma_post_send, rdma_reg_msgs, RAI_PASSIVE,
};
use std::ffi::{CStr, CString};
use std::io;
use std::mem;
use std::ptr::{self, NonNull};
use tracing::{debug, info};

/// Inline-data threshold requested on the queue pair; sends up to this size
/// may be inlined into the work request.
const MAX_INLINE_DATA: usize = 16;

/// Routing information from address resolution; freed as soon as the
/// endpoint has consumed it.
struct AddrInfo(NonNull<rdma_addrinfo>);

impl AddrInfo {
    fn as_ptr(&self) -> *mut rdma_addrinfo {
        self.0.as_ptr()
    }
}

impl Drop for AddrInfo {
    fn drop(&mut self) {
        unsafe { rdma_freeaddrinfo(self.0.as_ptr()) };
    }
}

/// Owned communication identifier.
struct CmId(NonNull<rdma_cm_id>);

impl CmId {
    fn as_ptr(&self) -> *mut rdma_cm_id {
        self.0.as_ptr()
    }
}

impl Drop for CmId {
    fn drop(&mut self) {
        unsafe { rdma_destroy_ep(self.0.as_ptr()) };
    }
}

unsafe impl Send for CmId {}

/// Token binding the transfer buffer to the connection for remote access.
struct Registration(NonNull<ibv_mr>);

impl Registration {
    fn as_ptr(&self) -> *mut ibv_mr {
        self.0.as_ptr()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        unsafe { rdma_dereg_mr(self.0.as_ptr()) };
    }
}

unsafe impl Send for Registration {}

/// Resolved route to the peer (or the local passive address).
pub struct Resolved {
    info: AddrInfo,
    role: Role,
}

impl Resolved {
    pub fn new(cfg: &Config) -> Result<Resolved> {
        let role = cfg.role();
        let service = cstring(cfg.port.to_string(), SetupStage::Resolve)?;
        let node = match &cfg.peer {
            Some(peer) => Some(cstring(peer.clone(), SetupStage::Resolve)?),
            None => None,
        };

        let mut hints: rdma_addrinfo = unsafe { mem::zeroed() };
        hints.ai_port_space = rdma_port_space::RDMA_PS_TCP as i32;
        if role == Role::Responder {
            hints.ai_flags = RAI_PASSIVE as i32;
        }

        let mut info: *mut rdma_addrinfo = ptr::null_mut();
        let rc = unsafe {
            rdma_getaddrinfo(
                node.as_ref().map_or(ptr::null(), |n| n.as_ptr()),
                service.as_ptr(),
                &hints,
                &mut info,
            )
        };
        if rc != 0 {
            return Err(Error::connection(
                SetupStage::Resolve,
                io::Error::last_os_error(),
            ));
        }
        let info = NonNull::new(info).ok_or_else(|| {
            Error::connection(SetupStage::Resolve, io::ErrorKind::AddrNotAvailable.into())
        })?;
        debug!(?role, "route resolved");
        Ok(Resolved {
            info: AddrInfo(info),
            role,
        })
    }

    /// Allocates the local identifier with fixed queue capacities: one
    /// outstanding send, one outstanding receive, one scatter/gather entry,
    /// and a completion for every send.
    pub fn create_endpoint(self, cfg: &Config) -> Result<Endpoint> {
        let mut attr: ibv_qp_init_attr = unsafe { mem::zeroed() };
        attr.cap.max_send_wr = 1;
        attr.cap.max_recv_wr = 1;
        attr.cap.max_send_sge = 1;
        attr.cap.max_recv_sge = 1;
        attr.cap.max_inline_data = cfg.size.min(MAX_INLINE_DATA) as u32;
        attr.sq_sig_all = 1;

        let mut id: *mut rdma_cm_id = ptr::null_mut();
        let rc = unsafe { rdma_create_ep(&mut id, self.info.as_ptr(), ptr::null_mut(), &mut attr) };
        if rc != 0 {
            return Err(Error::connection(
                SetupStage::CreateEndpoint,
                io::Error::last_os_error(),
            ));
        }
        let id = NonNull::new(id).ok_or_else(|| {
            Error::connection(SetupStage::CreateEndpoint, io::ErrorKind::NotFound.into())
        })?;
        debug!("endpoint created");
        Ok(Endpoint {
            id: CmId(id),
            role: self.role,
        })
    }
}

/// Local endpoint, ready to connect out or to listen.
pub struct Endpoint {
    id: CmId,
    role: Role,
}

impl Endpoint {
    /// Establishes the connection for this endpoint's role and binds the
    /// transfer buffer, yielding a connection in the ready state.
    pub fn establish(self, buf: Buffer) -> Result<Connection> {
        match self.role {
            Role::Responder => self.accept(buf),
            Role::Initiator => self.connect(buf),
        }
    }

    /// Responder path: waits for exactly one initiator. The buffer is
    /// registered and one receive posted before the accept, so the
    /// initiator's first send cannot race it.
    fn accept(self, mut buf: Buffer) -> Result<Connection> {
        let listen = self.id;
        let rc = unsafe { rdma_listen(listen.as_ptr(), 0) };
        if rc != 0 {
            return Err(Error::connection(
                SetupStage::Listen,
                io::Error::last_os_error(),
            ));
        }

        let mut conn: *mut rdma_cm_id = ptr::null_mut();
        let rc = unsafe { rdma_get_request(listen.as_ptr(), &mut conn) };
        if rc != 0 {
            return Err(Error::connection(
                SetupStage::Accept,
                io::Error::last_os_error(),
            ));
        }
        let id = CmId(NonNull::new(conn).ok_or_else(|| {
            Error::connection(SetupStage::Accept, io::ErrorKind::NotConnected.into())
        })?);

        let reg = register(&id, &mut buf)?;
        let rc = unsafe {
            rdma_post_recv(
                id.as_ptr(),
                ptr::null_mut(),
                buf.as_ptr().cast(),
                buf.len(),
                reg.as_ptr(),
            )
        };
        if rc != 0 {
            return Err(Error::connection(
                SetupStage::Accept,
                io::Error::last_os_error(),
            ));
        }

        let rc = unsafe { rdma_accept(id.as_ptr(), ptr::null_mut()) };
        if rc != 0 {
            return Err(Error::connection(
                SetupStage::Accept,
                io::Error::last_os_error(),
            ));
        }
        match device_name(&id) {
            Some(device) => info!(%device, "accepted initiator connection"),
            None => info!("accepted initiator connection"),
        }
        Ok(Connection {
            reg,
            id,
            _listen: Some(listen),
            buf,
        })
    }

    /// Initiator path: connects, then registers its own buffer.
    fn connect(self, mut buf: Buffer) -> Result<Connection> {
        let id = self.id;
        let rc = unsafe { rdma_connect(id.as_ptr(), ptr::null_mut()) };
        if rc != 0 {
            return Err(Error::connection(
                SetupStage::Connect,
                io::Error::last_os_error(),
            ));
        }
        let reg = register(&id, &mut buf)?;
        info!("connected to responder");
        Ok(Connection {
            reg,
            id,
            _listen: None,
            buf,
        })
    }
}

fn register(id: &CmId, buf: &mut Buffer) -> Result<Registration> {
    let mr = unsafe { rdma_reg_msgs(id.as_ptr(), buf.as_ptr().cast(), buf.len()) };
    let mr = NonNull::new(mr).ok_or_else(|| {
        Error::connection(SetupStage::Register, io::Error::last_os_error())
    })?;
    Ok(Registration(mr))
}

fn device_name(id: &CmId) -> Option<String> {
    unsafe {
        let verbs = (*id.as_ptr()).verbs;
        if verbs.is_null() {
            return None;
        }
        let name = ibv_get_device_name((*verbs).device);
        if name.is_null() {
            return None;
        }
        Some(CStr::from_ptr(name).to_string_lossy().into_owned())
    }
}

fn cstring(s: String, stage: SetupStage) -> Result<CString> {
    CString::new(s).map_err(|_| Error::connection(stage, io::ErrorKind::InvalidInput.into()))
}

/// Established connection owning the registration and the transfer buffer.
/// Field order fixes the release sequence: deregister, tear down the
/// endpoint, then release the buffer.
pub struct Connection {
    reg: Registration,
    id: CmId,
    _listen: Option<CmId>,
    buf: Buffer,
}

impl Connection {
    /// Resolves, creates the endpoint and establishes the connection for the
    /// configured role, taking ownership of the transfer buffer.
    pub fn establish(cfg: &Config, buf: Buffer) -> Result<Connection> {
        Resolved::new(cfg)?.create_endpoint(cfg)?.establish(buf)
    }

    fn completion(&mut self, n: i32, wc: &ibv_wc) -> io::Result<()> {
        if n != 1 {
            return Err(io::Error::last_os_error());
        }
        if wc.status != ibv_wc_status::IBV_WC_SUCCESS {
            let reason = unsafe { CStr::from_ptr(ibv_wc_status_str(wc.status)) };
            return Err(io::Error::other(format!(
                "work completion failed: {} ({})",
                reason.to_string_lossy(),
                wc.status
            )));
        }
        Ok(())
    }
}

impl Channel for Connection {
    fn buf(&mut self) -> &mut [u8] {
        self.buf.as_mut_slice()
    }

    fn post_send(&mut self) -> io::Result<()> {
        let rc = unsafe {
            rdma_post_send(
                self.id.as_ptr(),
                ptr::null_mut(),
                self.buf.as_ptr().cast(),
                self.buf.len(),
                self.reg.as_ptr(),
                0,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn post_recv(&mut self) -> io::Result<()> {
        let rc = unsafe {
            rdma_post_recv(
                self.id.as_ptr(),
                ptr::null_mut(),
                self.buf.as_ptr().cast(),
                self.buf.len(),
                self.reg.as_ptr(),
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn complete_send(&mut self) -> io::Result<()> {
        let mut wc: ibv_wc = unsafe { mem::zeroed() };
        let n = unsafe { rdma_get_send_comp(self.id.as_ptr(), &mut wc) };
        self.completion(n, &wc)
    }

    fn complete_recv(&mut self) -> io::Result<()> {
        let mut wc: ibv_wc = unsafe { mem::zeroed() };
        let n = unsafe { rdma_get_recv_comp(self.id.as_ptr(), &mut wc) };
        self.completion(n, &wc)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        unsafe { rdma_disconnect(self.id.as_ptr()) };
    }
}
