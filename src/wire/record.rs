use std::net::Ipv4Addr;

use crate::error::CResult;
use crate::resource::{Rdata, RecordType, Resource, Srv};
use crate::wire::buffer::Buffer;

/// A question as carried in a message's question section. mDNS overloads
/// the top bit of the class field as the "unicast response requested" (QU)
/// bit (RFC 6762 §5.4); everywhere else in the engine this is just
/// `class == 1` (IN).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub qname: String,
    pub qtype: RecordType,
    pub qclass: u16,
    pub unicast_response: bool,
}

impl Question {
    pub fn read(buffer: &mut Buffer) -> CResult<Question> {
        let mut qname = String::new();
        buffer.read_qname(&mut qname)?;
        let qtype = RecordType::from_num(buffer.read_u16()?);
        let raw_class = buffer.read_u16()?;
        Ok(Question {
            qname,
            qtype,
            qclass: raw_class & 0x7FFF,
            unicast_response: (raw_class & 0x8000) != 0,
        })
    }

    pub fn write(&self, buffer: &mut Buffer) -> CResult<()> {
        buffer.write_qname(&self.qname)?;
        buffer.write_u16(self.qtype.to_num())?;
        let raw_class = self.qclass | if self.unicast_response { 0x8000 } else { 0 };
        buffer.write_u16(raw_class)?;
        Ok(())
    }
}

/// A resource record as carried on the wire: a [`Resource`] plus the
/// mDNS cache-flush bit, which lives in the class field rather than on the
/// resource itself since it's a wire/transport concern, not part of the
/// record's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRecord {
    pub resource: Resource,
    pub class: u16,
    pub cache_flush: bool,
}

impl WireRecord {
    pub fn read(buffer: &mut Buffer) -> CResult<WireRecord> {
        let mut name = String::new();
        buffer.read_qname(&mut name)?;
        let rtype = RecordType::from_num(buffer.read_u16()?);
        let raw_class = buffer.read_u16()?;
        let ttl = buffer.read_u32()?;
        let rdlength = buffer.read_u16()? as usize;
        let rdata_start = buffer.pos();

        let rdata = match rtype {
            RecordType::A => {
                let octets = buffer.read_bytes(4)?;
                Rdata::Ip(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
            }
            RecordType::Ns | RecordType::Cname | RecordType::Ptr => {
                let mut target = String::new();
                buffer.read_qname(&mut target)?;
                Rdata::Name(target)
            }
            RecordType::Srv => {
                let priority = buffer.read_u16()?;
                let weight = buffer.read_u16()?;
                let port = buffer.read_u16()?;
                let mut target = String::new();
                buffer.read_qname(&mut target)?;
                Rdata::Srv {
                    target,
                    srv: Srv { priority, weight, port },
                }
            }
            RecordType::Txt | RecordType::Any | RecordType::Unknown(_) => {
                Rdata::Raw(buffer.read_bytes(rdlength)?)
            }
        };

        buffer.seek(rdata_start + rdlength)?;

        Ok(WireRecord {
            resource: Resource {
                name,
                rtype,
                ttl,
                rdata,
            },
            class: raw_class & 0x7FFF,
            cache_flush: (raw_class & 0x8000) != 0,
        })
    }

    pub fn write(&self, buffer: &mut Buffer) -> CResult<()> {
        buffer.write_qname(&self.resource.name)?;
        buffer.write_u16(self.resource.rtype.to_num())?;
        let raw_class = self.class | if self.cache_flush { 0x8000 } else { 0 };
        buffer.write_u16(raw_class)?;
        buffer.write_u32(self.resource.ttl)?;

        let rdlength_pos = buffer.pos();
        buffer.write_u16(0)?;
        let rdata_start = buffer.pos();

        match &self.resource.rdata {
            Rdata::Ip(ip) => buffer.write_bytes(&ip.octets())?,
            Rdata::Name(target) => buffer.write_qname(target)?,
            Rdata::Srv { target, srv } => {
                buffer.write_u16(srv.priority)?;
                buffer.write_u16(srv.weight)?;
                buffer.write_u16(srv.port)?;
                buffer.write_qname(target)?;
            }
            Rdata::Raw(bytes) => buffer.write_bytes(bytes)?,
            Rdata::Empty => {}
        }

        let rdlength = buffer.pos() - rdata_start;
        buffer.set_u16(rdlength_pos, rdlength as u16)?;
        Ok(())
    }
}

/// Whether `candidate` is "the same answer" as `published`, for known-answer
/// suppression and for conflict detection while probing: name and type must
/// match (either side may be the `ANY` wildcard), and then the comparison
/// follows the record's own notion of identity — an SRV's identity is its
/// four fields, a name-valued record's identity is its target name,
/// anything else is compared by raw rdata bytes.
pub fn match_answer(published: &Resource, candidate: &Resource) -> bool {
    if !published.name.eq_ignore_ascii_case(&candidate.name) {
        return false;
    }
    if published.rtype != candidate.rtype && published.rtype != RecordType::Any && candidate.rtype != RecordType::Any {
        return false;
    }
    match (&published.rdata, &candidate.rdata) {
        (Rdata::Srv { target: t1, srv: s1 }, Rdata::Srv { target: t2, srv: s2 }) => {
            t1.eq_ignore_ascii_case(t2) && s1 == s2
        }
        (Rdata::Name(n1), Rdata::Name(n2)) => n1.eq_ignore_ascii_case(n2),
        (Rdata::Ip(a), Rdata::Ip(b)) => a == b,
        (Rdata::Raw(a), Rdata::Raw(b)) => a == b,
        (Rdata::Empty, Rdata::Empty) => true,
        _ => false,
    }
}

/// A conservative upper bound, in bytes, on the wire size of `resource`
/// once encoded: used to decide whether appending it to the message being
/// built would overflow the configured frame before actually writing it.
pub fn estimated_rr_size(resource: &Resource) -> usize {
    // name (worst case, uncompressed) + type + class + ttl + rdlength
    let mut size = resource.name.len() + 2 + 2 + 2 + 4 + 2;
    size += match &resource.rdata {
        Rdata::Ip(_) => 4,
        Rdata::Name(target) => target.len() + 2,
        Rdata::Srv { target, .. } => 6 + target.len() + 2,
        Rdata::Raw(bytes) => bytes.len(),
        Rdata::Empty => 0,
    };
    size
}
