use crate::{ProtocolError, Result};
use bytes::Bytes;
use gearman_core::Priority;

/// Packet direction marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    /// `\0REQ`, sent by clients and workers
    Request,
    /// `\0RES`, sent by the job server
    Response,
}

impl Magic {
    pub const REQUEST: [u8; 4] = *b"\0REQ";
    pub const RESPONSE: [u8; 4] = *b"\0RES";

    pub fn from_bytes(bytes: [u8; 4]) -> Result<Self> {
        match bytes {
            Self::REQUEST => Ok(Magic::Request),
            Self::RESPONSE => Ok(Magic::Response),
            other => Err(ProtocolError::InvalidMagic(other)),
        }
    }

    pub fn as_bytes(&self) -> [u8; 4] {
        match self {
            Magic::Request => Self::REQUEST,
            Magic::Response => Self::RESPONSE,
        }
    }
}

/// Binary packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketType {
    CanDo = 1,
    CantDo = 2,
    ResetAbilities = 3,
    PreSleep = 4,
    Noop = 6,
    SubmitJob = 7,
    JobCreated = 8,
    GrabJob = 9,
    NoJob = 10,
    JobAssign = 11,
    WorkStatus = 12,
    WorkComplete = 13,
    WorkFail = 14,
    GetStatus = 15,
    EchoReq = 16,
    EchoRes = 17,
    SubmitJobBg = 18,
    Error = 19,
    StatusRes = 20,
    SubmitJobHigh = 21,
    SetClientId = 22,
    CanDoTimeout = 23,
    AllYours = 24,
    WorkException = 25,
    OptionReq = 26,
    OptionRes = 27,
    WorkData = 28,
    WorkWarning = 29,
    GrabJobUniq = 30,
    JobAssignUniq = 31,
    SubmitJobHighBg = 32,
    SubmitJobLow = 33,
    SubmitJobLowBg = 34,
    GetStatusUnique = 41,
    StatusResUnique = 42,
}

impl PacketType {
    pub fn from_u32(value: u32) -> Option<Self> {
        use PacketType::*;
        let kind = match value {
            1 => CanDo,
            2 => CantDo,
            3 => ResetAbilities,
            4 => PreSleep,
            6 => Noop,
            7 => SubmitJob,
            8 => JobCreated,
            9 => GrabJob,
            10 => NoJob,
            11 => JobAssign,
            12 => WorkStatus,
            13 => WorkComplete,
            14 => WorkFail,
            15 => GetStatus,
            16 => EchoReq,
            17 => EchoRes,
            18 => SubmitJobBg,
            19 => Error,
            20 => StatusRes,
            21 => SubmitJobHigh,
            22 => SetClientId,
            23 => CanDoTimeout,
            24 => AllYours,
            25 => WorkException,
            26 => OptionReq,
            27 => OptionRes,
            28 => WorkData,
            29 => WorkWarning,
            30 => GrabJobUniq,
            31 => JobAssignUniq,
            32 => SubmitJobHighBg,
            33 => SubmitJobLow,
            34 => SubmitJobLowBg,
            41 => GetStatusUnique,
            42 => StatusResUnique,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// Number of NUL separated arguments in the body. The last one may
    /// itself contain NUL bytes.
    pub fn arg_count(&self) -> usize {
        use PacketType::*;
        match self {
            ResetAbilities | PreSleep | Noop | GrabJob | NoJob | AllYours | GrabJobUniq => 0,
            CanDo | CantDo | JobCreated | WorkFail | GetStatus | EchoReq | EchoRes
            | SetClientId | OptionReq | OptionRes | GetStatusUnique => 1,
            CanDoTimeout | WorkComplete | WorkException | WorkData | WorkWarning | Error => 2,
            SubmitJob | SubmitJobBg | SubmitJobHigh | SubmitJobHighBg | SubmitJobLow
            | SubmitJobLowBg | JobAssign | WorkStatus => 3,
            JobAssignUniq => 4,
            StatusRes => 5,
            StatusResUnique => 6,
        }
    }

    pub fn is_submit(&self) -> bool {
        use PacketType::*;
        matches!(
            self,
            SubmitJob | SubmitJobBg | SubmitJobHigh | SubmitJobHighBg | SubmitJobLow | SubmitJobLowBg
        )
    }
}

/// Submission packet type for a priority / background combination
pub fn submit_type(priority: Priority, background: bool) -> PacketType {
    match (priority, background) {
        (Priority::Normal, false) => PacketType::SubmitJob,
        (Priority::Normal, true) => PacketType::SubmitJobBg,
        (Priority::High, false) => PacketType::SubmitJobHigh,
        (Priority::High, true) => PacketType::SubmitJobHighBg,
        (Priority::Low, false) => PacketType::SubmitJobLow,
        (Priority::Low, true) => PacketType::SubmitJobLowBg,
    }
}

/// A decoded binary packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub magic: Magic,
    pub kind: PacketType,
    pub args: Vec<Bytes>,
}

impl Packet {
    pub fn request(kind: PacketType, args: Vec<Bytes>) -> Self {
        Packet {
            magic: Magic::Request,
            kind,
            args,
        }
    }

    pub fn response(kind: PacketType, args: Vec<Bytes>) -> Self {
        Packet {
            magic: Magic::Response,
            kind,
            args,
        }
    }

    pub fn arg(&self, index: usize) -> Result<&[u8]> {
        self.args
            .get(index)
            .map(|b| b.as_ref())
            .ok_or(ProtocolError::ArgumentCount {
                kind: self.kind,
                expected: index + 1,
                actual: self.args.len(),
            })
    }

    pub fn arg_str(&self, index: usize) -> Result<&str> {
        std::str::from_utf8(self.arg(index)?).map_err(|_| {
            ProtocolError::InvalidArgument(format!(
                "{:?} argument {} is not valid UTF-8",
                self.kind, index
            ))
        })
    }

    pub fn arg_u32(&self, index: usize) -> Result<u32> {
        let text = self.arg_str(index)?;
        text.trim().parse().map_err(|_| {
            ProtocolError::InvalidArgument(format!(
                "{:?} argument {} is not an integer: {:?}",
                self.kind, index, text
            ))
        })
    }

    /// Argument holding a boolean flag (`"0"` / `"1"`)
    pub fn arg_flag(&self, index: usize) -> Result<bool> {
        Ok(self.arg_u32(index)? != 0)
    }

    /// Owned copy of the trailing argument, usually the data payload
    pub fn data(&self) -> Vec<u8> {
        self.args.last().map(|b| b.to_vec()).unwrap_or_default()
    }

    pub fn body_len(&self) -> usize {
        let joined: usize = self.args.iter().map(|a| a.len()).sum();
        joined + self.args.len().saturating_sub(1)
    }

    pub fn submit(
        function: &str,
        unique: &str,
        workload: &[u8],
        priority: Priority,
        background: bool,
    ) -> Self {
        Packet::request(
            submit_type(priority, background),
            vec![
                Bytes::copy_from_slice(function.as_bytes()),
                Bytes::copy_from_slice(unique.as_bytes()),
                Bytes::copy_from_slice(workload),
            ],
        )
    }

    pub fn get_status(handle: &str) -> Self {
        Packet::request(
            PacketType::GetStatus,
            vec![Bytes::copy_from_slice(handle.as_bytes())],
        )
    }

    pub fn get_status_unique(unique: &str) -> Self {
        Packet::request(
            PacketType::GetStatusUnique,
            vec![Bytes::copy_from_slice(unique.as_bytes())],
        )
    }

    pub fn echo(payload: &[u8]) -> Self {
        Packet::request(PacketType::EchoReq, vec![Bytes::copy_from_slice(payload)])
    }

    pub fn can_do(function: &str, timeout_secs: Option<u32>) -> Self {
        match timeout_secs {
            Some(secs) => Packet::request(
                PacketType::CanDoTimeout,
                vec![
                    Bytes::copy_from_slice(function.as_bytes()),
                    Bytes::from(secs.to_string()),
                ],
            ),
            None => Packet::request(
                PacketType::CanDo,
                vec![Bytes::copy_from_slice(function.as_bytes())],
            ),
        }
    }

    pub fn cant_do(function: &str) -> Self {
        Packet::request(
            PacketType::CantDo,
            vec![Bytes::copy_from_slice(function.as_bytes())],
        )
    }

    pub fn set_client_id(id: &str) -> Self {
        Packet::request(
            PacketType::SetClientId,
            vec![Bytes::copy_from_slice(id.as_bytes())],
        )
    }

    /// Argument-less request such as `GRAB_JOB_UNIQ` or `PRE_SLEEP`
    pub fn bare(kind: PacketType) -> Self {
        Packet::request(kind, Vec::new())
    }

    /// Worker-side report about a running job
    pub fn work(kind: PacketType, handle: &str, payload: &[u8]) -> Self {
        let mut args = vec![Bytes::copy_from_slice(handle.as_bytes())];
        if kind.arg_count() > 1 {
            args.push(Bytes::copy_from_slice(payload));
        }
        Packet::request(kind, args)
    }

    pub fn work_status(handle: &str, numerator: u32, denominator: u32) -> Self {
        Packet::request(
            PacketType::WorkStatus,
            vec![
                Bytes::copy_from_slice(handle.as_bytes()),
                Bytes::from(numerator.to_string()),
                Bytes::from(denominator.to_string()),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_conversion() {
        assert_eq!(PacketType::from_u32(7), Some(PacketType::SubmitJob));
        assert_eq!(PacketType::from_u32(42), Some(PacketType::StatusResUnique));
        assert_eq!(PacketType::from_u32(5), None);
        assert_eq!(PacketType::from_u32(99), None);
        assert_eq!(PacketType::JobAssignUniq.as_u32(), 31);
    }

    #[test]
    fn test_submit_type_matrix() {
        assert_eq!(submit_type(Priority::Normal, false), PacketType::SubmitJob);
        assert_eq!(submit_type(Priority::High, true), PacketType::SubmitJobHighBg);
        assert_eq!(submit_type(Priority::Low, false), PacketType::SubmitJobLow);
        assert!(submit_type(Priority::Low, true).is_submit());
    }

    #[test]
    fn test_magic() {
        assert_eq!(Magic::from_bytes(*b"\0RES").unwrap(), Magic::Response);
        assert!(matches!(
            Magic::from_bytes(*b"stat"),
            Err(ProtocolError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_work_packet_shapes() {
        let fail = Packet::work(PacketType::WorkFail, "H:1", b"ignored");
        assert_eq!(fail.args.len(), 1);

        let data = Packet::work(PacketType::WorkData, "H:1", b"chunk");
        assert_eq!(data.args.len(), 2);
        assert_eq!(data.body_len(), "H:1".len() + 1 + "chunk".len());

        let status = Packet::work_status("H:1", 3, 10);
        assert_eq!(status.arg_u32(1).unwrap(), 3);
        assert_eq!(status.arg_u32(2).unwrap(), 10);
    }

    #[test]
    fn test_missing_argument() {
        let packet = Packet::response(PacketType::Noop, Vec::new());
        assert!(packet.arg(0).is_err());
        assert!(packet.data().is_empty());
    }
}
