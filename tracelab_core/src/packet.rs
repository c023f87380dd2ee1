use crate::connection::FourTuple;
use pcap_file::DataLink;
use pnet::packet::Packet;
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::vlan::VlanPacket;
use pnet::util::MacAddr;
use std::net::IpAddr;

const ETHERNET_HEADER_LEN: usize = 14;
const LINUX_SLL_HEADER_LEN: usize = 16;
const LINUX_SLL2_HEADER_LEN: usize = 20;
const NULL_HEADER_LEN: usize = 4;

/// Network layer view of a captured frame.
pub struct NetworkFrame<'a> {
    pub ethertype: EtherType,
    pub payload: &'a [u8],
    pub link_header_len: usize,
    pub has_ethernet: bool,
}

impl<'a> NetworkFrame<'a> {
    pub fn parse(datalink: DataLink, frame: &'a [u8]) -> Option<Self> {
        match datalink {
            DataLink::ETHERNET => {
                let ethernet = EthernetPacket::new(frame)?;
                let mut ethertype = ethernet.get_ethertype();
                let mut offset = ETHERNET_HEADER_LEN;
                if ethertype == EtherTypes::Vlan {
                    let vlan = VlanPacket::new(&frame[offset..])?;
                    ethertype = vlan.get_ethertype();
                    offset += VlanPacket::minimum_packet_size();
                }
                Some(Self {
                    ethertype,
                    payload: frame.get(offset..)?,
                    link_header_len: offset,
                    has_ethernet: true,
                })
            }
            DataLink::RAW | DataLink::IPV4 | DataLink::IPV6 => Self::from_ip(frame, 0),
            DataLink::LINUX_SLL => {
                let protocol = frame.get(14..16)?;
                Self::from_link(
                    frame,
                    LINUX_SLL_HEADER_LEN,
                    EtherType(u16::from_be_bytes([protocol[0], protocol[1]])),
                )
            }
            DataLink::LINUX_SLL2 => {
                let protocol = frame.get(0..2)?;
                Self::from_link(
                    frame,
                    LINUX_SLL2_HEADER_LEN,
                    EtherType(u16::from_be_bytes([protocol[0], protocol[1]])),
                )
            }
            DataLink::NULL | DataLink::LOOP => Self::from_ip(frame, NULL_HEADER_LEN),
            _ => None,
        }
    }

    fn from_link(frame: &'a [u8], header_len: usize, ethertype: EtherType) -> Option<Self> {
        Some(Self {
            ethertype,
            payload: frame.get(header_len..)?,
            link_header_len: header_len,
            has_ethernet: false,
        })
    }

    fn from_ip(frame: &'a [u8], header_len: usize) -> Option<Self> {
        let payload = frame.get(header_len..)?;
        let ethertype = match payload.first()? >> 4 {
            4 => EtherTypes::Ipv4,
            6 => EtherTypes::Ipv6,
            _ => return None,
        };
        Some(Self {
            ethertype,
            payload,
            link_header_len: header_len,
            has_ethernet: false,
        })
    }

    /// Source and destination of a TCP or UDP packet over IPv4 or IPv6.
    pub fn four_tuple(&self) -> Option<FourTuple> {
        match self.ethertype {
            EtherTypes::Ipv4 => {
                let ip = Ipv4Packet::new(self.payload)?;
                // later fragments carry no transport header
                if ip.get_fragment_offset() != 0 {
                    return None;
                }
                let header_len = usize::from(ip.get_header_length()) * 4;
                transport_tuple(
                    IpAddr::V4(ip.get_source()),
                    IpAddr::V4(ip.get_destination()),
                    ip.get_next_level_protocol(),
                    self.payload.get(header_len..)?,
                )
            }
            EtherTypes::Ipv6 => {
                let ip = Ipv6Packet::new(self.payload)?;
                transport_tuple(
                    IpAddr::V6(ip.get_source()),
                    IpAddr::V6(ip.get_destination()),
                    ip.get_next_header(),
                    self.payload.get(Ipv6Packet::minimum_packet_size()..)?,
                )
            }
            _ => None,
        }
    }

    /// Frame bytes with an Ethernet II header, synthesizing one when missing.
    pub fn to_ethernet(&self, frame: &[u8]) -> Vec<u8> {
        if self.has_ethernet {
            return frame.to_vec();
        }
        let mut buffer = vec![0u8; ETHERNET_HEADER_LEN + self.payload.len()];
        if let Some(mut ethernet) = MutableEthernetPacket::new(&mut buffer) {
            ethernet.set_source(MacAddr::zero());
            ethernet.set_destination(MacAddr::zero());
            ethernet.set_ethertype(self.ethertype);
            ethernet.set_payload(self.payload);
        }
        buffer
    }
}

fn transport_tuple(
    src_ip: IpAddr,
    dst_ip: IpAddr,
    protocol: IpNextHeaderProtocol,
    payload: &[u8],
) -> Option<FourTuple> {
    let (src_port, dst_port) = match protocol {
        IpNextHeaderProtocols::Tcp => {
            let tcp = TcpPacket::new(payload)?;
            (tcp.get_source(), tcp.get_destination())
        }
        IpNextHeaderProtocols::Udp => {
            let udp = UdpPacket::new(payload)?;
            (udp.get_source(), udp.get_destination())
        }
        _ => return None,
    };
    Some(FourTuple {
        src_ip,
        src_port,
        dst_ip,
        dst_port,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pnet::packet::ipv4::MutableIpv4Packet;
    use pnet::packet::ipv6::MutableIpv6Packet;
    use pnet::packet::tcp::MutableTcpPacket;
    use pnet::packet::udp::MutableUdpPacket;
    use std::net::{Ipv4Addr, Ipv6Addr};

    pub(crate) fn ipv4_packet(
        src: &str,
        src_port: u16,
        dst: &str,
        dst_port: u16,
        tcp: bool,
    ) -> Vec<u8> {
        let transport_len = if tcp { 20 } else { 8 };
        let mut buffer = vec![0u8; 20 + transport_len];
        {
            let mut ip = MutableIpv4Packet::new(&mut buffer).unwrap();
            ip.set_version(4);
            ip.set_header_length(5);
            ip.set_total_length((20 + transport_len) as u16);
            ip.set_ttl(64);
            ip.set_next_level_protocol(if tcp {
                IpNextHeaderProtocols::Tcp
            } else {
                IpNextHeaderProtocols::Udp
            });
            ip.set_source(src.parse::<Ipv4Addr>().unwrap());
            ip.set_destination(dst.parse::<Ipv4Addr>().unwrap());
        }
        write_ports(&mut buffer[20..], src_port, dst_port, tcp);
        buffer
    }

    pub(crate) fn ipv6_tcp_packet(src: &str, src_port: u16, dst: &str, dst_port: u16) -> Vec<u8> {
        let mut buffer = vec![0u8; 40 + 20];
        {
            let mut ip = MutableIpv6Packet::new(&mut buffer).unwrap();
            ip.set_version(6);
            ip.set_payload_length(20);
            ip.set_next_header(IpNextHeaderProtocols::Tcp);
            ip.set_hop_limit(64);
            ip.set_source(src.parse::<Ipv6Addr>().unwrap());
            ip.set_destination(dst.parse::<Ipv6Addr>().unwrap());
        }
        write_ports(&mut buffer[40..], src_port, dst_port, true);
        buffer
    }

    fn write_ports(buffer: &mut [u8], src_port: u16, dst_port: u16, tcp: bool) {
        if tcp {
            let mut tcp = MutableTcpPacket::new(buffer).unwrap();
            tcp.set_source(src_port);
            tcp.set_destination(dst_port);
            tcp.set_data_offset(5);
        } else {
            let mut udp = MutableUdpPacket::new(buffer).unwrap();
            udp.set_source(src_port);
            udp.set_destination(dst_port);
            udp.set_length(8);
        }
    }

    pub(crate) fn ethernet_frame(ip: &[u8], ethertype: EtherType) -> Vec<u8> {
        let mut buffer = vec![0u8; ETHERNET_HEADER_LEN + ip.len()];
        let mut ethernet = MutableEthernetPacket::new(&mut buffer).unwrap();
        ethernet.set_source(MacAddr::new(2, 0, 0, 0, 0, 1));
        ethernet.set_destination(MacAddr::new(2, 0, 0, 0, 0, 2));
        ethernet.set_ethertype(ethertype);
        ethernet.set_payload(ip);
        buffer
    }

    #[test]
    fn test_ethernet_ipv4_tcp() {
        let frame = ethernet_frame(
            &ipv4_packet("192.168.1.100", 54321, "93.184.216.34", 443, true),
            EtherTypes::Ipv4,
        );
        let parsed = NetworkFrame::parse(DataLink::ETHERNET, &frame).unwrap();
        assert_eq!(
            parsed.four_tuple().unwrap().to_string(),
            "192.168.1.100:54321->93.184.216.34:443"
        );
        assert_eq!(parsed.to_ethernet(&frame), frame);
    }

    #[test]
    fn test_vlan_tagged_udp() {
        let ip = ipv4_packet("10.0.0.1", 5353, "10.0.0.2", 53, false);
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&[0x81, 0x00, 0x00, 0x0a, 0x08, 0x00]);
        frame.extend_from_slice(&ip);
        let parsed = NetworkFrame::parse(DataLink::ETHERNET, &frame).unwrap();
        assert_eq!(parsed.link_header_len, 18);
        assert_eq!(
            parsed.four_tuple().unwrap().to_string(),
            "10.0.0.1:5353->10.0.0.2:53"
        );
    }

    #[test]
    fn test_raw_ipv6_rewrapped() {
        let ip = ipv6_tcp_packet("2001:db8::1", 40000, "2001:db8::2", 443);
        let parsed = NetworkFrame::parse(DataLink::RAW, &ip).unwrap();
        assert_eq!(parsed.ethertype, EtherTypes::Ipv6);
        let tuple = parsed.four_tuple().unwrap();
        assert_eq!(tuple.src_port, 40000);
        assert_eq!(tuple.dst_port, 443);

        let wrapped = parsed.to_ethernet(&ip);
        assert_eq!(wrapped.len(), ip.len() + 14);
        let reparsed = NetworkFrame::parse(DataLink::ETHERNET, &wrapped).unwrap();
        assert_eq!(reparsed.four_tuple(), Some(tuple));
    }

    #[test]
    fn test_linux_sll() {
        let ip = ipv4_packet("172.16.0.5", 1234, "172.16.0.6", 80, true);
        let mut frame = vec![0u8; 14];
        frame.extend_from_slice(&[0x08, 0x00]);
        frame.extend_from_slice(&ip);
        let parsed = NetworkFrame::parse(DataLink::LINUX_SLL, &frame).unwrap();
        assert_eq!(parsed.four_tuple().unwrap().dst_port, 80);
    }

    #[test]
    fn test_non_ip_and_non_transport_dropped() {
        let arp = ethernet_frame(&[0u8; 28], EtherTypes::Arp);
        let parsed = NetworkFrame::parse(DataLink::ETHERNET, &arp).unwrap();
        assert!(parsed.four_tuple().is_none());

        let mut icmp = ipv4_packet("10.0.0.1", 0, "10.0.0.2", 0, false);
        icmp[9] = 1;
        let parsed = NetworkFrame::parse(DataLink::RAW, &icmp).unwrap();
        assert!(parsed.four_tuple().is_none());

        assert!(NetworkFrame::parse(DataLink::ETHERNET, &[0u8; 4]).is_none());
    }
}
