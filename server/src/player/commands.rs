use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::debug;
use thiserror::Error;

use mxo_shared::proto::{self, cmd, msg, short_cmd, ChatType};
use mxo_shared::{Block, ByteBuffer, CodecError, District, Location};

use super::events::{EventKind, EventParams};
use super::session::{PlayerSession, SessionState};
use crate::world::{DistrictCatalog, GameObject, ObjectGraph, Outbox, WorldError};

const BACKGROUND_MAX: usize = 1024;
const ABILITY_DURATION: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum CommandError {
    /// Unknown ids are warned about and dropped; the session survives.
    #[error("unknown command {id:#06x}")]
    UnknownCommand { id: u16 },

    /// A parse failure aborts the single command, not the session.
    #[error("malformed command arguments: {0}")]
    Codec(#[from] CodecError),

    #[error("command not allowed in state {state}")]
    WrongState { state: SessionState },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("background exceeds {max} bytes")]
    BackgroundTooLong { max: usize },

    #[error(transparent)]
    World(#[from] WorldError),
}

/// Everything a command handler may touch during one dispatch.
pub struct CommandContext<'a> {
    pub session: &'a mut PlayerSession,
    pub graph: &'a mut ObjectGraph,
    pub districts: &'a DistrictCatalog,
    pub outbox: &'a mut Outbox,
    pub now: Instant,
    pub jackout_grace: Duration,
}

type Handler = fn(&mut CommandContext, &mut ByteBuffer) -> Result<(), CommandError>;

/// Dispatch from a numeric command id to a handler. The wire carries
/// either an 8-bit id, or a 0x00 marker byte followed by a 16-bit id
/// (0x00 is not a valid byte command, so the encoding is unambiguous).
pub struct CommandDispatcher {
    byte_table: HashMap<u8, Handler>,
    short_table: HashMap<u16, Handler>,
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandDispatcher {
    pub fn new() -> Self {
        let mut byte_table: HashMap<u8, Handler> = HashMap::new();
        byte_table.insert(cmd::READY_FOR_SPAWN, handle_ready_for_spawn);
        byte_table.insert(cmd::CHAT, handle_chat);
        byte_table.insert(cmd::WHISPER, handle_whisper);
        byte_table.insert(cmd::STOP_ANIMATION, handle_stop_animation);
        byte_table.insert(cmd::START_ANIMATION, handle_start_animation);
        byte_table.insert(cmd::CHANGE_MOOD, handle_change_mood);
        byte_table.insert(cmd::PERFORM_EMOTE, handle_perform_emote);
        byte_table.insert(cmd::DYNAMIC_OBJ_INTERACTION, handle_object_interaction);
        byte_table.insert(cmd::STATIC_OBJ_INTERACTION, handle_object_interaction);
        byte_table.insert(cmd::JUMP, handle_jump);
        byte_table.insert(cmd::REGION_LOADED, handle_region_loaded);
        byte_table.insert(cmd::READY_FOR_WORLD_CHANGE, handle_ready_for_world_change);
        byte_table.insert(cmd::WHO, handle_who);
        byte_table.insert(cmd::WHERE_AM_I, handle_where_am_i);
        byte_table.insert(cmd::GET_PLAYER_DETAILS, handle_get_player_details);
        byte_table.insert(cmd::GET_BACKGROUND, handle_get_background);
        byte_table.insert(cmd::SET_BACKGROUND, handle_set_background);
        byte_table.insert(cmd::HARDLINE_TELEPORT, handle_hardline_teleport);
        byte_table.insert(cmd::OBJECT_SELECTED, handle_object_selected);
        byte_table.insert(cmd::JACKOUT_REQUEST, handle_jackout_request);
        byte_table.insert(cmd::JACKOUT_FINISHED, handle_jackout_finished);

        let mut short_table: HashMap<u16, Handler> = HashMap::new();
        short_table.insert(short_cmd::ABILITY_USE, handle_ability_use);
        for id in [
            short_cmd::TRADE_REQUEST,
            short_cmd::TRADE_ACCEPT,
            short_cmd::TRADE_DECLINE,
            short_cmd::TRADE_CANCEL,
            short_cmd::TRADE_ADD_ITEM,
            short_cmd::TRADE_REMOVE_ITEM,
            short_cmd::TRADE_SET_INFO,
            short_cmd::TRADE_CONFIRM,
        ] {
            short_table.insert(id, handle_trade);
        }
        for id in [
            short_cmd::GROUP_INVITE,
            short_cmd::GROUP_ACCEPT,
            short_cmd::GROUP_DECLINE,
            short_cmd::GROUP_LEAVE,
            short_cmd::GROUP_KICK,
            short_cmd::GROUP_PROMOTE,
            short_cmd::GROUP_DISBAND,
        ] {
            short_table.insert(id, handle_group);
        }

        Self {
            byte_table,
            short_table,
        }
    }

    /// Dispatches one `PLAYER_COMMAND` block body.
    pub fn dispatch(&self, ctx: &mut CommandContext, data: &[u8]) -> Result<(), CommandError> {
        let mut reader = ByteBuffer::from_bytes(data);
        let first = reader.read_u8()?;
        let (id, handler) = if first == 0x00 {
            let id = reader.read_u16()?;
            (id, self.short_table.get(&id))
        } else {
            (first as u16, self.byte_table.get(&first))
        };
        let handler = handler.ok_or(CommandError::UnknownCommand { id })?;
        handler(ctx, &mut reader)
    }
}

fn require_in_world(ctx: &CommandContext) -> Result<(), CommandError> {
    if ctx.session.is_in_world() {
        Ok(())
    } else {
        Err(CommandError::WrongState {
            state: ctx.session.state,
        })
    }
}

/// Standard chat block layout: type, sender handle, message text.
pub fn chat_block(chat_type: ChatType, sender: &str, message: &str) -> Block {
    Block::build(msg::CHAT_MESSAGE, |body| {
        body.write_u8(chat_type as u8);
        body.write_cstring(sender);
        body.write_cstring(message);
    })
}

fn system_reply(ctx: &mut CommandContext, message: &str) {
    let block = chat_block(ChatType::System, "", message);
    ctx.outbox
        .to_session(ctx.session.id, msg::CHAT_MESSAGE, vec![block], true);
}

/// Destroys the player object and moves the session into teardown. Used
/// by the jackout command, the jackout timed event, and forced
/// disconnects.
pub fn perform_jackout(
    session: &mut PlayerSession,
    graph: &mut ObjectGraph,
    outbox: &mut Outbox,
) {
    session.events.cancel(EventKind::Jackout);
    if let Some(object_id) = session.object_id.take() {
        // destroy broadcast goes to the last-known district
        let _ = graph.destroy(object_id, outbox);
    }
    session.mark_dirty();
    session.set_state(SessionState::Disconnecting);
}

// Byte commands

fn handle_ready_for_spawn(
    ctx: &mut CommandContext,
    _args: &mut ByteBuffer,
) -> Result<(), CommandError> {
    if ctx.session.state != SessionState::Connected {
        return Err(CommandError::WrongState {
            state: ctx.session.state,
        });
    }
    ctx.session.set_state(SessionState::WorldLoading);

    let district = ctx.session.district;
    // world snapshot first, then one create per visible object
    let world_state = Block::build(msg::WORLD_STATE, |body| {
        body.write_u8(district.id());
        body.write_u32(ctx.graph.objects_in_district(district).len() as u32);
    });
    ctx.outbox
        .to_session(ctx.session.id, msg::WORLD_STATE, vec![world_state], true);

    for object_id in ctx.graph.objects_in_district(district) {
        if let Some(object) = ctx.graph.get(object_id) {
            if object.visible {
                ctx.outbox.to_session(
                    ctx.session.id,
                    msg::OBJECT_CREATE,
                    vec![object.create_block()],
                    true,
                );
            }
        }
    }

    // the player's own create is broadcast to the whole district
    let object = GameObject::new(
        mxo_shared::ObjectType::Player,
        ctx.session.position,
        district,
        ctx.session.handle.clone(),
        ctx.session.player_body(),
    );
    let object_id = ctx.graph.create(object, ctx.outbox)?;
    ctx.session.object_id = Some(object_id);
    Ok(())
}

fn handle_region_loaded(
    ctx: &mut CommandContext,
    _args: &mut ByteBuffer,
) -> Result<(), CommandError> {
    if ctx.session.state != SessionState::WorldLoading {
        return Err(CommandError::WrongState {
            state: ctx.session.state,
        });
    }
    ctx.session.region_loaded = true;
    ctx.session.set_state(SessionState::InWorld);
    Ok(())
}

fn handle_chat(ctx: &mut CommandContext, args: &mut ByteBuffer) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    let chat_type = ChatType::try_from(args.read_u8()?)
        .map_err(|_| CommandError::InvalidArgument("chat type"))?;
    let message = args.read_cstring()?;

    let block = chat_block(chat_type, &ctx.session.handle, &message);
    match chat_type {
        ChatType::Broadcast | ChatType::Ooc => {
            ctx.outbox
                .to_all(None, msg::CHAT_MESSAGE, vec![block], true);
        }
        ChatType::Whisper | ChatType::Group | ChatType::Faction | ChatType::System => {
            // these travel on their own commands or are server-originated
            return Err(CommandError::InvalidArgument("chat type"));
        }
        _ => {
            ctx.outbox.to_district(
                ctx.session.district,
                None,
                msg::CHAT_MESSAGE,
                vec![block],
                true,
            );
        }
    }
    Ok(())
}

fn handle_whisper(ctx: &mut CommandContext, args: &mut ByteBuffer) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    let target = args.read_cstring()?;
    let message = args.read_cstring()?;

    if ctx.graph.object_id_by_handle(&target).is_none() {
        system_reply(ctx, &format!("{target} is not jacked in"));
        return Ok(());
    }
    let block = chat_block(ChatType::Whisper, &ctx.session.handle, &message);
    ctx.outbox
        .to_handle(&target, msg::CHAT_MESSAGE, vec![block], true);
    Ok(())
}

fn handle_stop_animation(
    ctx: &mut CommandContext,
    _args: &mut ByteBuffer,
) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    ctx.session.current_animation = 0;
    Ok(())
}

fn handle_start_animation(
    ctx: &mut CommandContext,
    args: &mut ByteBuffer,
) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    let animation = args.read_u8()?;
    if !proto::animation_valid(animation) {
        return Err(CommandError::InvalidArgument("animation id"));
    }
    ctx.session.current_animation = animation;
    Ok(())
}

fn handle_change_mood(ctx: &mut CommandContext, args: &mut ByteBuffer) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    let mood = args.read_u8()?;
    if !proto::mood_valid(mood) {
        return Err(CommandError::InvalidArgument("mood id"));
    }
    ctx.session.current_mood = mood;
    ctx.session.mark_dirty();
    Ok(())
}

fn handle_perform_emote(
    ctx: &mut CommandContext,
    args: &mut ByteBuffer,
) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    let emote_id = args.read_u32()?;
    ctx.session.emote_counter = ctx.session.emote_counter.wrapping_add(1);
    let counter = ctx.session.emote_counter;

    let handle = ctx.session.handle.clone();
    let block = Block::build(msg::CHAT_MESSAGE, |body| {
        body.write_u8(ChatType::Emote as u8);
        body.write_cstring(&handle);
        body.write_u32(emote_id);
        body.write_u8(counter);
    });
    ctx.outbox.to_district(
        ctx.session.district,
        None,
        msg::CHAT_MESSAGE,
        vec![block],
        true,
    );
    Ok(())
}

fn handle_object_interaction(
    ctx: &mut CommandContext,
    args: &mut ByteBuffer,
) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    let object_id = args.read_u32()?;
    let Some(object) = ctx.graph.get(object_id) else {
        debug!("{}: interaction with unknown object {object_id}", ctx.session.id);
        return Ok(());
    };
    if object.district != ctx.session.district {
        return Err(CommandError::InvalidArgument("object in another district"));
    }
    ctx.outbox.to_session(
        ctx.session.id,
        msg::OBJECT_UPDATE,
        vec![object.update_block()],
        true,
    );
    Ok(())
}

fn handle_jump(ctx: &mut CommandContext, args: &mut ByteBuffer) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    let target = Location::read(args)?;
    ctx.session.position = target;
    if let Some(object_id) = ctx.session.object_id {
        if let Some(object) = ctx.graph.get_mut(object_id) {
            object.position = target;
        }
    }
    ctx.session.mark_dirty();
    Ok(())
}

fn handle_ready_for_world_change(
    ctx: &mut CommandContext,
    _args: &mut ByteBuffer,
) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    ctx.session.region_loaded = false;
    let district = ctx.session.district;
    let count = ctx.graph.objects_in_district(district).len() as u32;
    let block = Block::build(msg::WORLD_STATE, |body| {
        body.write_u8(district.id());
        body.write_u32(count);
    });
    ctx.outbox
        .to_session(ctx.session.id, msg::WORLD_STATE, vec![block], true);
    Ok(())
}

fn handle_who(ctx: &mut CommandContext, _args: &mut ByteBuffer) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    let mut handles = Vec::new();
    for object_id in ctx.graph.objects_in_district(ctx.session.district) {
        if let Some(handle) = ctx.graph.get(object_id).and_then(|o| o.handle()) {
            handles.push(handle.to_string());
        }
    }
    let reply = format!(
        "{} residents in {}: {}",
        handles.len(),
        ctx.session.district,
        handles.join(", ")
    );
    system_reply(ctx, &reply);
    Ok(())
}

fn handle_where_am_i(ctx: &mut CommandContext, _args: &mut ByteBuffer) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    let position = ctx.session.position;
    let reply = format!(
        "{} ({:.1}, {:.1}, {:.1})",
        ctx.session.district, position.x, position.y, position.z
    );
    system_reply(ctx, &reply);
    Ok(())
}

fn handle_get_player_details(
    ctx: &mut CommandContext,
    args: &mut ByteBuffer,
) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    let target = args.read_cstring()?;
    let Some(object_id) = ctx.graph.object_id_by_handle(&target) else {
        system_reply(ctx, &format!("{target} is not jacked in"));
        return Ok(());
    };
    if let Some(object) = ctx.graph.get(object_id) {
        ctx.outbox.to_session(
            ctx.session.id,
            msg::OBJECT_CREATE,
            vec![object.create_block()],
            true,
        );
    }
    Ok(())
}

fn handle_get_background(
    ctx: &mut CommandContext,
    _args: &mut ByteBuffer,
) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    let background = ctx.session.background.clone();
    system_reply(ctx, &background);
    Ok(())
}

fn handle_set_background(
    ctx: &mut CommandContext,
    args: &mut ByteBuffer,
) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    let background = args.read_cstring()?;
    if background.len() > BACKGROUND_MAX {
        return Err(CommandError::BackgroundTooLong {
            max: BACKGROUND_MAX,
        });
    }
    ctx.session.background = background;
    ctx.session.mark_dirty();
    Ok(())
}

fn handle_hardline_teleport(
    ctx: &mut CommandContext,
    args: &mut ByteBuffer,
) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    let district = District::try_from(args.read_u8()?)
        .map_err(|_| CommandError::InvalidArgument("district id"))?;
    let hardline = args.read_u16()? as usize;

    let Some(position) = ctx.districts.hardline(district, hardline) else {
        system_reply(ctx, "that hardline is not active");
        return Ok(());
    };
    ctx.session.events.cancel(EventKind::Teleport);
    ctx.session.events.schedule(
        EventKind::Teleport,
        EventParams::Teleport { district, position },
        ctx.now,
    );
    Ok(())
}

fn handle_object_selected(
    ctx: &mut CommandContext,
    args: &mut ByteBuffer,
) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    let object_id = args.read_u32()?;
    if let Some(object) = ctx.graph.get(object_id) {
        ctx.outbox.to_session(
            ctx.session.id,
            msg::OBJECT_UPDATE,
            vec![object.update_block()],
            true,
        );
    }
    Ok(())
}

fn handle_jackout_request(
    ctx: &mut CommandContext,
    _args: &mut ByteBuffer,
) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    // the player object stays in the world for the grace period
    ctx.session.schedule_jackout(ctx.now, ctx.jackout_grace);
    let block = Block::build(msg::JACKOUT_RESPONSE, |body| {
        body.write_u16(0);
    });
    ctx.outbox
        .to_session(ctx.session.id, msg::JACKOUT_RESPONSE, vec![block], true);
    Ok(())
}

fn handle_jackout_finished(
    ctx: &mut CommandContext,
    _args: &mut ByteBuffer,
) -> Result<(), CommandError> {
    perform_jackout(ctx.session, ctx.graph, ctx.outbox);
    Ok(())
}

// Short commands

fn handle_ability_use(ctx: &mut CommandContext, args: &mut ByteBuffer) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    let ability_id = args.read_u32()?;
    ctx.session.events.schedule(
        EventKind::AbilityEnd,
        EventParams::AbilityEnd { ability_id },
        ctx.now + ABILITY_DURATION,
    );
    Ok(())
}

fn handle_trade(ctx: &mut CommandContext, _args: &mut ByteBuffer) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    system_reply(ctx, "trading is not available on this server");
    Ok(())
}

fn handle_group(ctx: &mut CommandContext, _args: &mut ByteBuffer) -> Result<(), CommandError> {
    require_in_world(ctx)?;
    system_reply(ctx, "crews are not available on this server");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_byte_command_is_reported() {
        let dispatcher = CommandDispatcher::new();
        assert!(dispatcher.byte_table.get(&0xEE).is_none());
    }

    #[test]
    fn every_documented_byte_command_is_registered() {
        let dispatcher = CommandDispatcher::new();
        for id in 0x01..=0x15u8 {
            assert!(
                dispatcher.byte_table.contains_key(&id),
                "byte command {id:#04x} missing"
            );
        }
    }

    #[test]
    fn every_documented_short_command_is_registered() {
        let dispatcher = CommandDispatcher::new();
        for id in 0x0100..=0x010Fu16 {
            assert!(
                dispatcher.short_table.contains_key(&id),
                "short command {id:#06x} missing"
            );
        }
    }
}
