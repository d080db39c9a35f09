//! GEXF graph export of a finished schedule.
//!
//! Nodes are the depot and every calendar visit; edges are the travel legs
//! of each carer's route, annotated with the road travel time.

use std::collections::HashSet;
use std::fmt::Write as _;

use super::location_cache::LocationCache;
use crate::types::{Problem, ScheduledVisit, Solution, VisitId};

const HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gexf xmlns="http://www.gexf.net/1.2draft" version="1.2">
  <graph mode="static" defaultedgetype="directed">
"#;

const FOOTER: &str = "  </graph>\n</gexf>\n";

/// Render the solution as a GEXF document.
pub fn write_solution(problem: &Problem, solution: &Solution, cache: &LocationCache) -> String {
    let mut out = String::with_capacity(16 * 1024);
    out.push_str(HEADER);

    out.push_str(
        r#"    <attributes class="node">
      <attribute id="0" title="id" type="long"/>
      <attribute id="1" title="latitude" type="double"/>
      <attribute id="2" title="longitude" type="double"/>
      <attribute id="3" title="start_time" type="string"/>
      <attribute id="4" title="duration" type="long"/>
      <attribute id="5" title="type" type="string"/>
      <attribute id="6" title="assigned_carer" type="string"/>
      <attribute id="7" title="dropped" type="boolean"/>
    </attributes>
    <attributes class="edge">
      <attribute id="0" title="travel_time" type="long"/>
    </attributes>
"#,
    );

    let assigned: HashSet<VisitId> = solution
        .visits()
        .iter()
        .filter(|visit| visit.carer().is_some())
        .filter_map(|visit| visit.calendar_visit().map(|calendar| calendar.id()))
        .collect();

    out.push_str("    <nodes>\n");
    out.push_str("      <node id=\"depot\" label=\"depot\"/>\n");
    for visit in problem.visits() {
        let dropped = !assigned.contains(&visit.id());
        let scheduled = solution.visits().iter().find(|scheduled| {
            scheduled.calendar_visit().map(|calendar| calendar.id()) == Some(visit.id())
        });
        let (lat, lon) = visit
            .location()
            .map(|location| (location.latitude(), location.longitude()))
            .unwrap_or((0.0, 0.0));
        let start = scheduled
            .map(|s| s.datetime().to_string())
            .unwrap_or_else(|| visit.datetime().to_string());
        let carer = scheduled
            .and_then(ScheduledVisit::carer)
            .map(|carer| carer.sap_number().to_string())
            .unwrap_or_default();

        let _ = write!(
            out,
            r#"      <node id="v{id}" label="visit {id}">
        <attvalues>
          <attvalue for="0" value="{id}"/>
          <attvalue for="1" value="{lat}"/>
          <attvalue for="2" value="{lon}"/>
          <attvalue for="3" value="{start}"/>
          <attvalue for="4" value="{duration}"/>
          <attvalue for="5" value="{kind}"/>
          <attvalue for="6" value="{carer}"/>
          <attvalue for="7" value="{dropped}"/>
        </attvalues>
      </node>
"#,
            id = visit.id(),
            lat = lat,
            lon = lon,
            start = escape(&start),
            duration = visit.duration().num_seconds(),
            kind = scheduled.map(|s| s.kind().as_str()).unwrap_or("unknown"),
            carer = escape(&carer),
            dropped = dropped,
        );
    }
    out.push_str("    </nodes>\n");

    out.push_str("    <edges>\n");
    let mut edge_id = 0usize;
    for route in solution.to_routes(problem) {
        if route.is_empty() {
            continue;
        }
        let mut previous: Option<&ScheduledVisit> = None;
        for visit in route.visits() {
            let (source, travel_time) = match previous {
                None => ("depot".to_string(), 0),
                Some(prev) => {
                    let travel = match (prev.location(), visit.location()) {
                        (Some(from), Some(to)) => cache.distance(from, to),
                        _ => 0,
                    };
                    (visit_node_id(prev), travel)
                }
            };
            let target = visit_node_id(visit);
            push_edge(&mut out, edge_id, &source, &target, travel_time);
            edge_id += 1;
            previous = Some(visit);
        }
        if let Some(last) = previous {
            push_edge(&mut out, edge_id, &visit_node_id(last), "depot", 0);
            edge_id += 1;
        }
    }
    out.push_str("    </edges>\n");

    out.push_str(FOOTER);
    out
}

fn visit_node_id(visit: &ScheduledVisit) -> String {
    match visit.calendar_visit() {
        Some(calendar) => format!("v{}", calendar.id()),
        None => "depot".to_string(),
    }
}

fn push_edge(out: &mut String, id: usize, source: &str, target: &str, travel_time: i64) {
    let _ = write!(
        out,
        r#"      <edge id="{id}" source="{source}" target="{target}">
        <attvalues>
          <attvalue for="0" value="{travel_time}"/>
        </attvalues>
      </edge>
"#,
    );
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
