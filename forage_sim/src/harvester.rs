// Harvester state machine and movement failure escalation.
//
// This is an `impl ForageSim` block: the state machine needs the arena, the
// registry, the navigator and the event queue together, and all of them
// live on the sim.
//
// ## Happy path
//
//   Idle -> MoveToResource (slot claimed, walking to it)
//        -> PlayHarvestAnimation (arrived; timed action)
//        -> HarvestResource (one harvest, clamped to cargo room)
//        -> PlayHarvestAnimation ... while cargo has room and node has stock
//        -> AsyncFindDropOff (slot released, query in flight)
//        -> MoveToDropOff -> DropOff (timed action, then unload)
//        -> MoveToResource again if the node is still good,
//           else AsyncFindResource -> FinishCommand -> Idle.
//
// ## Async replies
//
// Every query, move and timed action is fire-and-forget. The agent records
// the query id or action ticket it is waiting for; a reply or completion
// carrying anything else, or arriving when the agent is no longer in a
// state that expects it, is logged at debug and dropped. Candidate lists
// are hints: the agent walks them in rank order and takes the first one
// that still checks out against the arena right now.
//
// ## Escalation ladder
//
// When a direct move toward the leg's destination is rejected or stops
// short:
//   1. Within `acceptance_radius` of the destination: treat as arrived.
//   2. First failure on this leg: one unstuck move to the midpoint. If it
//      arrives, retry the direct move; if it is rejected or stops short,
//      go to 3.
//   3. Guarded teleport `teleport_step` toward the destination, once per
//      goal per blacklist window, then retry the direct move.
//   4. A goal that needs a second teleport is blacklisted and the agent
//      searches again for a different node or station.
// So an unreachable goal costs at most one unstuck and one teleport before
// it is dropped. Blacklists and teleport markers are cleared together on
// the sim's blacklist timer, never on success.

use crate::agent::{AiState, ClaimedSlot, Leg};
use crate::capability::Capability;
use crate::event::{ScheduledEventKind, SimEvent, SimEventKind};
use crate::navigation::MoveRequest;
use crate::query::QueryAnswer;
use crate::registry::{Dispatch, QueryReply};
use crate::sim::{ForageSim, QueryRoute};
use crate::types::{AgentId, Goal, NodeHandle, Point3, StationHandle};
use tracing::debug;

impl ForageSim {
    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    pub(crate) fn order_harvest(
        &mut self,
        id: AgentId,
        node: NodeHandle,
        events: &mut Vec<SimEvent>,
    ) {
        let Some(resource_type) = self.arena.node(node).map(|n| n.resource_type) else {
            debug!(?id, ?node, "harvest order for destroyed node ignored");
            return;
        };
        if !self.agents.contains_key(id) {
            return;
        }
        self.abandon_activity(id);
        if let Some(agent) = self.agents.get_mut(id) {
            agent.remembered_type = Some(resource_type);
        }
        if !self.commit_to_node(id, node, events) {
            debug!(?id, ?node, "node has no vacant slot, searching instead");
            self.start_resource_search(id, events);
        }
    }

    pub(crate) fn order_return_cargo(&mut self, id: AgentId, events: &mut Vec<SimEvent>) {
        let Some(agent) = self.agents.get(id) else {
            return;
        };
        let empty = agent.cargo.is_empty();
        self.abandon_activity(id);
        if empty {
            self.finish_command(id, events);
        } else {
            self.start_drop_off_search(id, events);
        }
    }

    pub(crate) fn order_terminate(&mut self, id: AgentId, events: &mut Vec<SimEvent>) {
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        agent.remembered_type = None;
        self.finish_command(id, events);
    }

    // -----------------------------------------------------------------------
    // Bookkeeping
    // -----------------------------------------------------------------------

    fn set_state(&mut self, id: AgentId, to: AiState, events: &mut Vec<SimEvent>) {
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        let from = agent.state;
        if from == to {
            return;
        }
        agent.state = to;
        self.emit(events, SimEventKind::AgentStateChanged { agent: id, from, to });
    }

    /// Drop the current leg, slots and async waits. Targets and the
    /// remembered type are left for the caller to decide.
    fn abandon_activity(&mut self, id: AgentId) {
        self.release_slots(id);
        if let Some(agent) = self.agents.get_mut(id) {
            agent.leg = None;
            agent.pending_query = None;
            agent.pending_action = None;
        }
    }

    fn release_slots(&mut self, id: AgentId) {
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        for slot in agent.claimed_slots.drain(..) {
            // A destroyed node has no slots left to release.
            if let Some(node) = self.arena.node_mut(slot.node) {
                let _ = node.register_occupied_location(slot.direction, false);
            }
        }
    }

    fn finish_command(&mut self, id: AgentId, events: &mut Vec<SimEvent>) {
        self.abandon_activity(id);
        if let Some(agent) = self.agents.get_mut(id) {
            agent.target_node = None;
            agent.target_station = None;
        } else {
            return;
        }
        self.set_state(id, AiState::FinishCommand, events);
        self.emit(events, SimEventKind::CommandFinished { agent: id });
        self.set_state(id, AiState::Idle, events);
    }

    fn start_timed_action(&mut self, id: AgentId, duration: u64) {
        let ticket = self.next_ticket();
        if let Some(agent) = self.agents.get_mut(id) {
            agent.pending_action = Some(ticket);
        }
        self.event_queue.schedule(
            self.tick + duration,
            ScheduledEventKind::ActionComplete { agent: id, ticket },
        );
    }

    fn within_acceptance(&self, id: AgentId) -> bool {
        self.agents.get(id).is_some_and(|agent| {
            agent.leg.is_some_and(|leg| {
                agent.position.distance(leg.destination) <= self.config.acceptance_radius
            })
        })
    }

    // -----------------------------------------------------------------------
    // Searches and replies
    // -----------------------------------------------------------------------

    fn start_resource_search(&mut self, id: AgentId, events: &mut Vec<SimEvent>) {
        let Some(agent) = self.agents.get(id) else {
            return;
        };
        let Some(resource_type) = agent.remembered_type else {
            self.finish_command(id, events);
            return;
        };
        let origin = agent.position;
        self.set_state(id, AiState::AsyncFindResource, events);
        let dispatch = self.registry.query_closest_resources(
            origin,
            self.config.query_candidate_count,
            resource_type,
            QueryRoute { agent: id },
        );
        self.await_dispatch(id, dispatch, events);
    }

    fn start_drop_off_search(&mut self, id: AgentId, events: &mut Vec<SimEvent>) {
        let Some(agent) = self.agents.get(id) else {
            return;
        };
        let Some((resource_type, carried)) = agent.cargo.heaviest() else {
            self.after_unload(id, events);
            return;
        };
        let (origin, owner) = (agent.position, agent.owner);
        self.set_state(id, AiState::AsyncFindDropOff, events);
        let dispatch = self.registry.query_closest_drop_offs(
            origin,
            self.config.query_candidate_count,
            Some(owner),
            carried,
            resource_type,
            QueryRoute { agent: id },
        );
        self.await_dispatch(id, dispatch, events);
    }

    fn await_dispatch(
        &mut self,
        id: AgentId,
        dispatch: Dispatch<QueryRoute>,
        events: &mut Vec<SimEvent>,
    ) {
        match dispatch {
            Dispatch::Queued(query) => {
                if let Some(agent) = self.agents.get_mut(id) {
                    agent.pending_query = Some(query);
                }
            }
            Dispatch::Answered(reply) => {
                if let Some(agent) = self.agents.get_mut(id) {
                    agent.pending_query = Some(reply.id);
                }
                self.handle_query_reply(reply, events);
            }
        }
    }

    pub(crate) fn handle_query_reply(
        &mut self,
        reply: QueryReply<QueryRoute>,
        events: &mut Vec<SimEvent>,
    ) {
        let id = reply.route.agent;
        let Some(agent) = self.agents.get_mut(id) else {
            debug!(?id, query = reply.id.0, "reply for removed agent dropped");
            return;
        };
        let expected = matches!(
            (&reply.answer, agent.state),
            (QueryAnswer::Resources(_), AiState::AsyncFindResource)
                | (QueryAnswer::DropOffs(_), AiState::AsyncFindDropOff)
        );
        if agent.pending_query != Some(reply.id) || !expected {
            debug!(?id, query = reply.id.0, state = ?agent.state, "stale query reply dropped");
            return;
        }
        agent.pending_query = None;

        match reply.answer {
            QueryAnswer::Resources(candidates) => {
                let chosen = candidates
                    .into_iter()
                    .find(|&node| self.node_is_viable(id, node));
                match chosen {
                    Some(node) if self.commit_to_node(id, node, events) => {}
                    _ => self.finish_command(id, events),
                }
            }
            QueryAnswer::DropOffs(candidates) => {
                let chosen = candidates
                    .into_iter()
                    .find(|&station| self.station_is_viable(id, station));
                match chosen {
                    Some(station) => self.commit_to_station(id, station, events),
                    None => self.finish_command(id, events),
                }
            }
        }
    }

    /// Authoritative re-check of a ranked node candidate.
    fn node_is_viable(&self, id: AgentId, node: NodeHandle) -> bool {
        let Some(agent) = self.agents.get(id) else {
            return false;
        };
        if agent.is_blacklisted(Goal::Node(node)) {
            return false;
        }
        self.arena.node(node).is_some_and(|n| {
            !n.is_empty() && n.has_vacant_slot() && agent.remembered_type == Some(n.resource_type)
        })
    }

    /// Authoritative re-check of a ranked station candidate.
    fn station_is_viable(&self, id: AgentId, station: StationHandle) -> bool {
        let Some(agent) = self.agents.get(id) else {
            return false;
        };
        if agent.is_blacklisted(Goal::Station(station)) {
            return false;
        }
        let Some((resource_type, _)) = agent.cargo.heaviest() else {
            return false;
        };
        match Capability::of_goal(Goal::Station(station), &self.arena) {
            Some(target @ Capability::Storage { owner, .. }) if owner == agent.owner => target
                .resolve_station(&self.arena)
                .is_some_and(|s| s.accepts(resource_type)),
            _ => false,
        }
    }

    // -----------------------------------------------------------------------
    // Legs
    // -----------------------------------------------------------------------

    /// Claim a slot on `node` and start walking to it. False if the node is
    /// gone or has no vacant slot.
    fn commit_to_node(
        &mut self,
        id: AgentId,
        node: NodeHandle,
        events: &mut Vec<SimEvent>,
    ) -> bool {
        let slot_radius = self.config.slot_radius;
        let Some(n) = self.arena.node_mut(node) else {
            return false;
        };
        let Some(direction) = n.claim_vacant_slot() else {
            return false;
        };
        let destination = n.slot_position(direction, slot_radius);
        let Some(agent) = self.agents.get_mut(id) else {
            let _ = n.register_occupied_location(direction, false);
            return false;
        };
        agent.claimed_slots.push(ClaimedSlot { node, direction });
        agent.target_node = Some(node);
        agent.leg = Some(Leg::new(Capability::Resource(node), destination));
        self.set_state(id, AiState::MoveToResource, events);
        self.request_direct_move(id, events);
        true
    }

    fn commit_to_station(
        &mut self,
        id: AgentId,
        station: StationHandle,
        events: &mut Vec<SimEvent>,
    ) {
        let Some(target) = Capability::of_goal(Goal::Station(station), &self.arena) else {
            return;
        };
        let Some(destination) = target.position(&self.arena) else {
            return;
        };
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        agent.target_station = Some(station);
        agent.leg = Some(Leg::new(target, destination));
        self.set_state(id, AiState::MoveToDropOff, events);
        self.request_direct_move(id, events);
    }

    /// Ask the navigator for a move to `to`. On acceptance the completion is
    /// scheduled and true returned; on rejection nothing is scheduled.
    fn request_move(&mut self, id: AgentId, to: Point3) -> bool {
        let Some(from) = self.agents.get(id).map(|a| a.position) else {
            return false;
        };
        match self.navigator.request_move(id, from, to) {
            MoveRequest::Rejected => false,
            MoveRequest::Accepted(plan) => {
                let ticket = self.next_ticket();
                if let Some(agent) = self.agents.get_mut(id) {
                    agent.pending_action = Some(ticket);
                }
                self.event_queue.schedule(
                    self.tick + plan.duration_ticks,
                    ScheduledEventKind::MovementComplete {
                        agent: id,
                        ticket,
                        end: plan.end,
                        arrived: plan.arrived,
                    },
                );
                true
            }
        }
    }

    fn request_direct_move(&mut self, id: AgentId, events: &mut Vec<SimEvent>) {
        let Some(leg) = self.agents.get(id).and_then(|a| a.leg) else {
            return;
        };
        if !self.request_move(id, leg.destination) {
            self.handle_direct_failure(id, events);
        }
    }

    pub(crate) fn handle_movement_complete(
        &mut self,
        id: AgentId,
        ticket: u64,
        end: Point3,
        arrived: bool,
        events: &mut Vec<SimEvent>,
    ) {
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        if agent.pending_action != Some(ticket) || !agent.state.is_moving() {
            debug!(?id, ticket, state = ?agent.state, "stale movement completion dropped");
            return;
        }
        agent.pending_action = None;
        agent.position = end;
        let state = agent.state;

        match (state.is_unstuck(), arrived) {
            (false, true) => self.arrive(id, events),
            (false, false) => self.handle_direct_failure(id, events),
            (true, true) => {
                // Reached the midpoint: back on the direct route.
                let direct = direct_state(state);
                self.set_state(id, direct, events);
                self.request_direct_move(id, events);
            }
            (true, false) => self.handle_unstuck_failure(id, events),
        }
    }

    pub(crate) fn handle_action_complete(
        &mut self,
        id: AgentId,
        ticket: u64,
        events: &mut Vec<SimEvent>,
    ) {
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        if agent.pending_action != Some(ticket) {
            debug!(?id, ticket, "stale action completion dropped");
            return;
        }
        agent.pending_action = None;
        let state = agent.state;
        match state {
            AiState::PlayHarvestAnimation => {
                self.set_state(id, AiState::HarvestResource, events);
                self.harvest_once(id, events);
            }
            AiState::DropOff => self.unload(id, events),
            state => debug!(?id, ?state, "action completion in unexpected state dropped"),
        }
    }

    // -----------------------------------------------------------------------
    // Escalation ladder
    // -----------------------------------------------------------------------

    /// A direct move was rejected or stopped short.
    fn handle_direct_failure(&mut self, id: AgentId, events: &mut Vec<SimEvent>) {
        if self.within_acceptance(id) {
            self.arrive(id, events);
            return;
        }
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        let Some(leg) = agent.leg.as_mut() else {
            return;
        };
        if leg.unstuck_used {
            self.guarded_teleport(id, events);
            return;
        }
        leg.unstuck_used = true;
        let goal = leg.goal();
        let midpoint = agent.position.midpoint(leg.destination);
        debug!(?id, ?goal, %midpoint, "move failed, trying unstuck");
        self.set_state(id, unstuck_state(goal), events);
        self.emit(events, SimEventKind::UnstuckAttempted { agent: id, goal });
        if !self.request_move(id, midpoint) {
            self.handle_unstuck_failure(id, events);
        }
    }

    /// The unstuck maneuver could not be requested or stopped short.
    fn handle_unstuck_failure(&mut self, id: AgentId, events: &mut Vec<SimEvent>) {
        if self.within_acceptance(id) {
            self.arrive(id, events);
        } else {
            self.guarded_teleport(id, events);
        }
    }

    fn guarded_teleport(&mut self, id: AgentId, events: &mut Vec<SimEvent>) {
        let step = self.config.teleport_step;
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        let Some(leg) = agent.leg else {
            return;
        };
        let goal = leg.goal();
        if !agent.teleports_used.insert(goal) {
            self.blacklist_goal(id, goal, events);
            return;
        }
        let from = agent.position;
        let to = from.step_toward(leg.destination, step);
        agent.position = to;
        debug!(?id, ?goal, %from, %to, "guarded teleport");
        self.emit(
            events,
            SimEventKind::Teleported {
                agent: id,
                goal,
                from,
                to,
            },
        );
        self.set_state(id, direct_state_for(goal), events);
        if self.within_acceptance(id) {
            self.arrive(id, events);
        } else {
            self.request_direct_move(id, events);
        }
    }

    fn blacklist_goal(&mut self, id: AgentId, goal: Goal, events: &mut Vec<SimEvent>) {
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        agent.blacklist.insert(goal);
        agent.leg = None;
        debug!(?id, ?goal, "goal blacklisted");
        self.emit(events, SimEventKind::GoalBlacklisted { agent: id, goal });
        match goal {
            Goal::Node(_) => {
                self.release_slots(id);
                if let Some(agent) = self.agents.get_mut(id) {
                    agent.target_node = None;
                }
                self.start_resource_search(id, events);
            }
            Goal::Station(_) => {
                if let Some(agent) = self.agents.get_mut(id) {
                    agent.target_station = None;
                }
                self.start_drop_off_search(id, events);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Harvest and drop-off
    // -----------------------------------------------------------------------

    fn arrive(&mut self, id: AgentId, events: &mut Vec<SimEvent>) {
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        let Some(leg) = agent.leg.take() else {
            return;
        };
        match leg.target {
            Capability::Resource(_) => {
                let stocked = leg
                    .target
                    .resolve_node(&self.arena)
                    .is_some_and(|n| !n.is_empty());
                if stocked {
                    self.set_state(id, AiState::PlayHarvestAnimation, events);
                    self.start_timed_action(id, self.config.harvest_animation_ticks);
                } else {
                    self.leave_spent_node(id, events);
                }
            }
            Capability::Storage { .. } => {
                self.set_state(id, AiState::DropOff, events);
                self.start_timed_action(id, self.config.drop_off_ticks);
            }
        }
    }

    /// The target node is gone or empty: unload what we have, or look for
    /// another node.
    fn leave_spent_node(&mut self, id: AgentId, events: &mut Vec<SimEvent>) {
        self.release_slots(id);
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        agent.target_node = None;
        if agent.cargo.is_empty() {
            self.start_resource_search(id, events);
        } else {
            self.start_drop_off_search(id, events);
        }
    }

    fn harvest_once(&mut self, id: AgentId, events: &mut Vec<SimEvent>) {
        let Some(agent) = self.agents.get(id) else {
            return;
        };
        let Some(node) = agent.target_node else {
            self.leave_spent_node(id, events);
            return;
        };
        let Some(n) = self.arena.node_mut(node).filter(|n| !n.is_empty()) else {
            self.leave_spent_node(id, events);
            return;
        };
        let resource_type = n.resource_type;
        let requested = n.amount_per_harvest().min(agent.cargo.room_for(resource_type));
        let outcome = n.harvest(requested);

        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        agent.cargo.load(resource_type, outcome.harvested);
        let current = agent.cargo.amount(resource_type);
        let max = agent.cargo.max_per_type();
        let cargo_full = agent.cargo.is_full(resource_type);

        self.emit(
            events,
            SimEventKind::Harvested {
                agent: id,
                node,
                resource_type,
                amount: outcome.harvested,
            },
        );
        self.emit(
            events,
            SimEventKind::NodeFillChanged {
                node,
                remaining: outcome.remaining,
                fill_percent: outcome.fill_percent,
            },
        );
        if outcome.emptied {
            self.emit(events, SimEventKind::NodeEmptied { node });
        }
        self.emit(
            events,
            SimEventKind::CargoFillChanged {
                agent: id,
                resource_type,
                current,
                max,
            },
        );

        if cargo_full || outcome.remaining == 0 {
            // Leaving the node: free the slot for someone else.
            self.release_slots(id);
            self.start_drop_off_search(id, events);
        } else {
            self.set_state(id, AiState::PlayHarvestAnimation, events);
            self.start_timed_action(id, self.config.harvest_animation_ticks);
        }
    }

    fn unload(&mut self, id: AgentId, events: &mut Vec<SimEvent>) {
        let Some(agent) = self.agents.get(id) else {
            return;
        };
        let station_handle = agent.target_station;
        let loaded: Vec<_> = agent.cargo.loaded().collect();
        let Some((station_handle, station)) = station_handle
            .and_then(|h| self.arena.station_mut(h).map(|s| (h, s)))
            .filter(|(_, s)| s.active)
        else {
            // Station destroyed or switched off while we walked over.
            if let Some(agent) = self.agents.get_mut(id) {
                agent.target_station = None;
            }
            self.start_drop_off_search(id, events);
            return;
        };

        let outcomes: Vec<_> = loaded
            .into_iter()
            .map(|(rt, amount)| (rt, station.drop_off(rt, amount)))
            .collect();

        for (resource_type, outcome) in outcomes {
            let Some(agent) = self.agents.get_mut(id) else {
                return;
            };
            agent.cargo.unload(resource_type, outcome.accepted);
            let current = agent.cargo.amount(resource_type);
            let max = agent.cargo.max_per_type();
            self.emit(
                events,
                SimEventKind::DroppedOff {
                    agent: id,
                    station: station_handle,
                    resource_type,
                    accepted: outcome.accepted,
                    remainder: outcome.remainder,
                },
            );
            if let Some(fill_percent) = outcome.fill_percent {
                self.emit(
                    events,
                    SimEventKind::StationFillChanged {
                        station: station_handle,
                        resource_type,
                        fill_percent,
                    },
                );
            }
            self.emit(
                events,
                SimEventKind::CargoFillChanged {
                    agent: id,
                    resource_type,
                    current,
                    max,
                },
            );
        }

        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        agent.target_station = None;
        if agent.cargo.is_empty() {
            self.after_unload(id, events);
        } else {
            // Station ran out of room: take the rest elsewhere.
            self.start_drop_off_search(id, events);
        }
    }

    /// Cargo is empty: go back to the last node if it still has stock,
    /// otherwise search for another one.
    fn after_unload(&mut self, id: AgentId, events: &mut Vec<SimEvent>) {
        let Some(agent) = self.agents.get(id) else {
            return;
        };
        let node = agent
            .target_node
            .filter(|&node| self.arena.node(node).is_some_and(|n| !n.is_empty()));
        match node {
            Some(node) if self.commit_to_node(id, node, events) => {}
            _ => {
                if let Some(agent) = self.agents.get_mut(id) {
                    agent.target_node = None;
                }
                self.start_resource_search(id, events);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Periodic tasks
    // -----------------------------------------------------------------------

    /// Idle agents with cargo take it home; idle agents with a remembered
    /// type look for more of it.
    pub(crate) fn idle_check(&mut self, events: &mut Vec<SimEvent>) {
        let idle: Vec<(AgentId, bool, bool)> = self
            .agents
            .iter()
            .filter(|(_, a)| a.state == AiState::Idle)
            .map(|(id, a)| (id, !a.cargo.is_empty(), a.remembered_type.is_some()))
            .collect();
        for (id, has_cargo, has_type) in idle {
            if has_cargo {
                self.order_return_cargo(id, events);
            } else if has_type {
                self.start_resource_search(id, events);
            }
        }
    }

    pub(crate) fn clear_blacklists(&mut self) {
        let mut cleared = 0;
        for (_, agent) in self.agents.iter_mut() {
            if !agent.blacklist.is_empty() || !agent.teleports_used.is_empty() {
                cleared += 1;
            }
            agent.clear_window();
        }
        if cleared > 0 {
            debug!(agents = cleared, "blacklist window cleared");
        }
    }
}

fn direct_state_for(goal: Goal) -> AiState {
    match goal {
        Goal::Node(_) => AiState::MoveToResource,
        Goal::Station(_) => AiState::MoveToDropOff,
    }
}

fn unstuck_state(goal: Goal) -> AiState {
    match goal {
        Goal::Node(_) => AiState::UnstuckTowardsResource,
        Goal::Station(_) => AiState::UnstuckTowardsDropOff,
    }
}

fn direct_state(unstuck: AiState) -> AiState {
    match unstuck {
        AiState::UnstuckTowardsDropOff => AiState::MoveToDropOff,
        _ => AiState::MoveToResource,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForageConfig;
    use crate::navigation::StraightLineNavigator;
    use crate::types::{OwnerId, ResourceType, SlotDirection};

    fn quiet_config() -> ForageConfig {
        ForageConfig {
            idle_check_interval_ticks: 1_000_000,
            blacklist_clear_interval_ticks: 1_000_000,
            ..ForageConfig::default()
        }
    }

    fn count(events: &[SimEvent], pred: impl Fn(&SimEventKind) -> bool) -> usize {
        events.iter().filter(|e| pred(&e.kind)).count()
    }

    #[test]
    fn assignment_claims_slot_and_walks_to_it() {
        let mut sim = ForageSim::without_worker(quiet_config());
        let agent = sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);
        let node = sim.spawn_resource_node(Point3::new(5.0, 0.0, 0.0), ResourceType::Wood, 100, 10);

        let events = sim.assign_harvest_target(agent, node);
        let a = sim.agent(agent).unwrap();
        assert_eq!(a.state, AiState::MoveToResource);
        assert_eq!(a.target_node, Some(node));
        assert_eq!(
            a.claimed_slots.as_slice(),
            &[ClaimedSlot {
                node,
                direction: SlotDirection::North
            }]
        );
        assert_eq!(sim.node(node).unwrap().occupied_slot_count(), 1);
        assert_eq!(
            count(&events, |k| matches!(
                k,
                SimEventKind::AgentStateChanged { to: AiState::MoveToResource, .. }
            )),
            1
        );

        let result = sim.step(&[], 40);
        let harvested: Vec<u32> = result
            .events
            .iter()
            .filter_map(|e| match e.kind {
                SimEventKind::Harvested { amount, .. } => Some(amount),
                _ => None,
            })
            .collect();
        assert_eq!(harvested, vec![10]);
        assert_eq!(sim.node(node).unwrap().remaining(), 90);
        assert_eq!(sim.agent(agent).unwrap().cargo.amount(ResourceType::Wood), 10);
        assert_eq!(sim.agent(agent).unwrap().state, AiState::PlayHarvestAnimation);
    }

    #[test]
    fn harvest_is_clamped_to_cargo_room() {
        let config = ForageConfig {
            cargo_capacity: 30,
            ..quiet_config()
        };
        let mut sim = ForageSim::without_worker(config);
        let agent = sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);
        let node = sim.spawn_resource_node(Point3::new(2.0, 0.0, 0.0), ResourceType::Metal, 80, 50);
        sim.assign_harvest_target(agent, node);

        let result = sim.step(&[], 200);
        let first = result.events.iter().find_map(|e| match e.kind {
            SimEventKind::Harvested { amount, .. } => Some(amount),
            _ => None,
        });
        assert_eq!(first, Some(30));
        assert_eq!(sim.node(node).unwrap().remaining(), 50);

        // Full cargo, no worker to find a station: the agent gives up and
        // idles with its load, and its slot is free again.
        let a = sim.agent(agent).unwrap();
        assert_eq!(a.state, AiState::Idle);
        assert_eq!(a.cargo.amount(ResourceType::Metal), 30);
        assert!(a.claimed_slots.is_empty());
        assert_eq!(sim.node(node).unwrap().occupied_slot_count(), 0);
    }

    #[test]
    fn zero_amount_per_harvest_does_not_stall() {
        let mut sim = ForageSim::without_worker(quiet_config());
        let agent = sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);
        let node = sim.spawn_resource_node(Point3::new(5.0, 0.0, 0.0), ResourceType::Wood, 100, 0);
        sim.assign_harvest_target(agent, node);

        sim.step(&[], 2_000);
        // One unit per harvest until the cargo fills, then the drop-off
        // search comes back empty and the agent idles with its load.
        let a = sim.agent(agent).unwrap();
        assert_eq!(a.state, AiState::Idle);
        assert_eq!(a.cargo.amount(ResourceType::Wood), 30);
        assert_eq!(sim.node(node).unwrap().remaining(), 70);
    }

    #[test]
    fn unreachable_node_gets_one_unstuck_and_one_teleport() {
        let node_pos = Point3::new(20.0, 0.0, 0.0);
        let mut sim = ForageSim::without_worker(quiet_config())
            .with_navigator(StraightLineNavigator::new(0.5).with_obstacle(node_pos, 6.0));
        let agent = sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);
        let node = sim.spawn_resource_node(node_pos, ResourceType::Stone, 100, 10);

        let mut events = sim.assign_harvest_target(agent, node);
        assert_eq!(sim.agent(agent).unwrap().state, AiState::UnstuckTowardsResource);
        events.extend(sim.step(&[], 200).events);

        let goal = Goal::Node(node);
        assert_eq!(
            count(&events, |k| matches!(k, SimEventKind::UnstuckAttempted { .. })),
            1
        );
        assert_eq!(
            count(&events, |k| matches!(k, SimEventKind::Teleported { .. })),
            1
        );
        assert_eq!(
            count(&events, |k| *k == SimEventKind::GoalBlacklisted { agent, goal }),
            1
        );
        // Blacklisting re-triggers a resource search.
        assert_eq!(
            count(&events, |k| matches!(
                k,
                SimEventKind::AgentStateChanged { to: AiState::AsyncFindResource, .. }
            )),
            1
        );

        let a = sim.agent(agent).unwrap();
        assert!(a.is_blacklisted(goal));
        assert!(a.teleports_used.contains(&goal));
        assert!(a.claimed_slots.is_empty());
        assert_eq!(sim.node(node).unwrap().occupied_slot_count(), 0);
        assert_eq!(a.state, AiState::Idle);
    }

    #[test]
    fn close_enough_counts_as_arrived() {
        // The slot sits just inside an obstacle, but the agent starts within
        // the acceptance radius of it.
        let node_pos = Point3::new(0.0, 0.0, 1.5);
        let config = ForageConfig {
            acceptance_radius: 1.0,
            ..quiet_config()
        };
        let mut sim = ForageSim::without_worker(config).with_navigator(
            StraightLineNavigator::new(0.5).with_obstacle(Point3::new(0.0, 0.0, 0.0), 0.5),
        );
        let agent = sim.spawn_harvester(OwnerId(0), Point3::new(0.5, 0.0, 0.0));
        let node = sim.spawn_resource_node(node_pos, ResourceType::Food, 10, 5);

        let events = sim.assign_harvest_target(agent, node);
        assert_eq!(sim.agent(agent).unwrap().state, AiState::PlayHarvestAnimation);
        assert_eq!(
            count(&events, |k| matches!(k, SimEventKind::UnstuckAttempted { .. })),
            0
        );
    }

    #[test]
    fn stale_movement_completion_is_dropped() {
        let mut sim = ForageSim::without_worker(quiet_config());
        let agent = sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);
        let node =
            sim.spawn_resource_node(Point3::new(10.0, 0.0, 0.0), ResourceType::Wood, 100, 10);
        sim.assign_harvest_target(agent, node);
        sim.terminate_command(agent);

        let result = sim.step(&[], 100);
        let a = sim.agent(agent).unwrap();
        assert_eq!(a.state, AiState::Idle);
        assert_eq!(a.position, Point3::ORIGIN, "late arrival must not move the agent");
        assert_eq!(a.remembered_type, None);
        assert_eq!(
            count(&result.events, |k| matches!(k, SimEventKind::Harvested { .. })),
            0
        );
        assert_eq!(sim.node(node).unwrap().occupied_slot_count(), 0);
    }

    #[test]
    fn blacklist_timer_clears_markers() {
        let node_pos = Point3::new(20.0, 0.0, 0.0);
        let config = ForageConfig {
            blacklist_clear_interval_ticks: 500,
            ..quiet_config()
        };
        let mut sim = ForageSim::without_worker(config)
            .with_navigator(StraightLineNavigator::new(0.5).with_obstacle(node_pos, 6.0));
        let agent = sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);
        let node = sim.spawn_resource_node(node_pos, ResourceType::Stone, 100, 10);

        sim.assign_harvest_target(agent, node);
        sim.step(&[], 200);
        assert!(sim.agent(agent).unwrap().is_blacklisted(Goal::Node(node)));

        sim.step(&[], 600);
        let a = sim.agent(agent).unwrap();
        assert!(a.blacklist.is_empty());
        assert!(a.teleports_used.is_empty());
    }

    #[test]
    fn explicit_order_ignores_blacklist() {
        let node_pos = Point3::new(20.0, 0.0, 0.0);
        let mut sim = ForageSim::without_worker(quiet_config())
            .with_navigator(StraightLineNavigator::new(0.5).with_obstacle(node_pos, 6.0));
        let agent = sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);
        let node = sim.spawn_resource_node(node_pos, ResourceType::Stone, 100, 10);
        sim.assign_harvest_target(agent, node);
        sim.step(&[], 200);
        assert!(sim.agent(agent).unwrap().is_blacklisted(Goal::Node(node)));

        // Move the obstacle out of the way and order the agent back.
        sim.set_navigator(StraightLineNavigator::new(0.5));
        sim.assign_harvest_target(agent, node);
        assert_eq!(sim.agent(agent).unwrap().state, AiState::MoveToResource);
        sim.step(&[], 400);
        assert!(sim.agent(agent).unwrap().cargo.amount(ResourceType::Stone) > 0);
    }

    #[test]
    fn destroyed_target_sends_agent_searching() {
        let mut sim = ForageSim::without_worker(quiet_config());
        let agent = sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);
        let node =
            sim.spawn_resource_node(Point3::new(10.0, 0.0, 0.0), ResourceType::Wood, 100, 10);
        sim.assign_harvest_target(agent, node);
        sim.destroy_resource_node(node);

        let result = sim.step(&[], 100);
        assert_eq!(
            count(&result.events, |k| matches!(
                k,
                SimEventKind::AgentStateChanged { to: AiState::AsyncFindResource, .. }
            )),
            1
        );
        let a = sim.agent(agent).unwrap();
        assert_eq!(a.state, AiState::Idle);
        assert_eq!(a.target_node, None);
        assert!(a.claimed_slots.is_empty());
    }

    #[test]
    fn idle_check_returns_partial_cargo() {
        let config = ForageConfig {
            idle_check_interval_ticks: 50,
            ..quiet_config()
        };
        let mut sim = ForageSim::without_worker(config);
        let agent = sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);
        sim.agents[agent].cargo.load(ResourceType::Wood, 5);

        let result = sim.step(&[], 60);
        // No worker: each idle check issues ReturnCargo, whose search comes
        // back empty at once.
        assert!(
            count(&result.events, |k| matches!(
                k,
                SimEventKind::AgentStateChanged { to: AiState::AsyncFindDropOff, .. }
            )) >= 1
        );
        assert_eq!(sim.agent(agent).unwrap().state, AiState::Idle);
    }
}
