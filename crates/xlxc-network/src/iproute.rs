//! `ip`, `iptables` and sysfs wrappers used by the real host.

use std::path::Path;

use ipnetwork::Ipv4Network;
use xlxc_common::command::run;
use xlxc_common::{HwAddress, XlxcError, XlxcResult};

/// Comment tag carried by every forwarding rule installed for `bridge`.
///
/// Bridge names are limited to `[A-Za-z0-9_-]`, so the tag is too and
/// `iptables -S` lists it unquoted.
#[must_use]
pub fn rule_tag(bridge: &str) -> String {
    format!("xlxc_{bridge}")
}

/// Create a bridge device.
pub async fn link_add_bridge(name: &str) -> XlxcResult<()> {
    run("ip", &["link", "add", "name", name, "type", "bridge"]).await?;
    Ok(())
}

/// Delete a link.
pub async fn link_delete(name: &str) -> XlxcResult<()> {
    run("ip", &["link", "delete", name]).await?;
    Ok(())
}

/// Set a link's hardware address.
pub async fn link_set_address(name: &str, address: HwAddress) -> XlxcResult<()> {
    let address = address.to_string();
    run("ip", &["link", "set", "dev", name, "address", &address]).await?;
    Ok(())
}

/// Enable promiscuous mode and bring a link up.
pub async fn link_set_promisc_up(name: &str) -> XlxcResult<()> {
    run("ip", &["link", "set", "dev", name, "promisc", "on", "up"]).await?;
    Ok(())
}

/// Add an IPv4 address to a link.
pub async fn addr_add(name: &str, address: Ipv4Network) -> XlxcResult<()> {
    let address = address.to_string();
    run("ip", &["addr", "add", &address, "dev", name]).await?;
    Ok(())
}

/// IPv4 addresses held by a link.
pub async fn addr_show(name: &str) -> XlxcResult<Vec<Ipv4Network>> {
    let out = run("ip", &["-o", "-4", "addr", "show", "dev", name]).await?;
    Ok(parse_inet(&out))
}

/// Parse the `inet` entries of `ip -o -4 addr show` output.
#[must_use]
pub fn parse_inet(output: &str) -> Vec<Ipv4Network> {
    output
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            words.find(|w| *w == "inet")?;
            words.next()?.parse().ok()
        })
        .collect()
}

/// Forward and masquerade traffic from `block` on `bridge` out of `iface`.
pub async fn uplink_add(bridge: &str, iface: &str, block: Ipv4Network) -> XlxcResult<()> {
    let tag = rule_tag(bridge);
    let block = block.to_string();
    let comment = ["-m", "comment", "--comment", tag.as_str()];

    tokio::fs::write("/proc/sys/net/ipv4/ip_forward", "1")
        .await
        .map_err(|e| XlxcError::host("ip_forward", e))?;

    let mut masquerade = vec!["-t", "nat", "-A", "POSTROUTING", "-s", block.as_str(), "-o", iface];
    masquerade.extend_from_slice(&comment);
    masquerade.extend_from_slice(&["-j", "MASQUERADE"]);

    let mut outbound = vec!["-A", "FORWARD", "-i", bridge, "-o", iface];
    outbound.extend_from_slice(&comment);
    outbound.extend_from_slice(&["-j", "ACCEPT"]);

    let mut inbound = vec!["-A", "FORWARD", "-i", iface, "-o", bridge];
    inbound.extend_from_slice(&["-m", "state", "--state", "RELATED,ESTABLISHED"]);
    inbound.extend_from_slice(&comment);
    inbound.extend_from_slice(&["-j", "ACCEPT"]);

    for rule in [masquerade, outbound, inbound] {
        run("iptables", &rule).await?;
    }

    tracing::info!(bridge, iface, "Forward rules configured");
    Ok(())
}

/// Remove every rule tagged for `bridge`, found by listing the chains.
pub async fn uplink_remove(bridge: &str) -> XlxcResult<()> {
    for (table, chain) in [("nat", "POSTROUTING"), ("filter", "FORWARD")] {
        let listing = run("iptables", &["-t", table, "-S", chain]).await?;
        for rule in tagged_rule_deletions(&listing, bridge) {
            let mut args = vec!["-t", table];
            args.extend(rule.iter().map(String::as_str));
            run("iptables", &args).await?;
        }
    }
    Ok(())
}

/// Turn the `-A` lines of an `iptables -S` listing tagged for `bridge`
/// into `-D` argument lists.
///
/// `iptables -S` wraps comments holding anything outside `[A-Za-z0-9_-]`
/// in double quotes. The quotes are shell syntax, not part of the
/// comment, so they are stripped from every word.
#[must_use]
pub fn tagged_rule_deletions(listing: &str, bridge: &str) -> Vec<Vec<String>> {
    let tag = rule_tag(bridge);
    listing
        .lines()
        .map(|line| {
            line.split_whitespace()
                .map(|word| unquote(word).to_string())
                .collect::<Vec<String>>()
        })
        .filter(|words| {
            words.first().map(String::as_str) == Some("-A")
                && words
                    .windows(2)
                    .any(|pair| pair[0] == "--comment" && pair[1] == tag)
        })
        .map(|mut words| {
            words[0] = "-D".to_string();
            words
        })
        .collect()
}

fn unquote(word: &str) -> &str {
    word.strip_prefix('"')
        .and_then(|w| w.strip_suffix('"'))
        .unwrap_or(word)
}

/// Interface names under a sysfs network directory, and which of them
/// are bridges.
pub fn sysfs_links(dir: &Path) -> XlxcResult<Vec<(String, bool)>> {
    let mut links = Vec::new();
    if !dir.exists() {
        return Ok(links);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_bridge = entry.path().join("bridge").is_dir();
        links.push((name, is_bridge));
    }
    links.sort();
    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inet_lines() {
        let out = "7: testbr    inet 10.0.0.6/29 brd 10.0.0.7 scope global testbr\\       valid_lft forever preferred_lft forever\n\
                   7: testbr    inet 10.0.1.2/30 scope global testbr\n";
        assert_eq!(
            parse_inet(out),
            vec![
                "10.0.0.6/29".parse::<Ipv4Network>().unwrap(),
                "10.0.1.2/30".parse().unwrap()
            ]
        );
        assert!(parse_inet("").is_empty());
    }

    #[test]
    fn deletes_only_rules_tagged_for_the_bridge() {
        let listing = "-P FORWARD ACCEPT\n\
            -A FORWARD -i test1br -o eth0 -m comment --comment xlxc_test1br -j ACCEPT\n\
            -A FORWARD -i test11br -o eth0 -m comment --comment xlxc_test11br -j ACCEPT\n\
            -A FORWARD -i eth0 -o docker0 -j ACCEPT\n";
        assert_eq!(
            tagged_rule_deletions(listing, "test1br"),
            vec![
                "-D FORWARD -i test1br -o eth0 -m comment --comment xlxc_test1br -j ACCEPT"
                    .split_whitespace()
                    .map(String::from)
                    .collect::<Vec<_>>()
            ]
        );
    }

    #[test]
    fn quoted_comments_are_matched() {
        let listing = "-P POSTROUTING ACCEPT\n\
            -A POSTROUTING -s 10.0.0.0/29 -o eth0 -m comment --comment \"xlxc_test1br\" -j MASQUERADE\n\
            -A FORWARD -i test1br -o eth0 -m comment --comment \"xlxc:test1br\" -j ACCEPT\n";
        let found = tagged_rule_deletions(listing, "test1br");
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0],
            "-D POSTROUTING -s 10.0.0.0/29 -o eth0 -m comment --comment xlxc_test1br -j MASQUERADE"
                .split_whitespace()
                .map(String::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn tag_needs_no_quoting() {
        let tag = rule_tag("net-0_1br");
        assert!(tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn sysfs_marks_bridges() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("eth0")).unwrap();
        std::fs::create_dir_all(temp.path().join("testbr/bridge")).unwrap();
        assert_eq!(
            sysfs_links(temp.path()).unwrap(),
            vec![("eth0".to_string(), false), ("testbr".to_string(), true)]
        );
    }
}
